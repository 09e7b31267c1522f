//! Per-agent todo list and scratchpad.
//!
//! Both live for exactly one agent run and are never shared.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoItem {
    pub id: u32,
    pub content: String,
    pub status: TodoStatus,
}

/// Ordered todo list with stable, monotonically increasing ids.
#[derive(Debug, Default)]
pub struct TodoManager {
    items: Vec<TodoItem>,
    next_id: u32,
}

impl TodoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending item and return its id (ids start at 1).
    pub fn add(&mut self, content: &str) -> u32 {
        self.next_id += 1;
        self.items.push(TodoItem {
            id: self.next_id,
            content: content.to_string(),
            status: TodoStatus::Pending,
        });
        self.next_id
    }

    pub fn get(&self, id: u32) -> Option<&TodoItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Mark an item completed. Returns false when the id is unknown.
    pub fn complete(&mut self, id: u32) -> bool {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.status = TodoStatus::Completed;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: u32) -> Option<TodoItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn view_all(&self) -> String {
        if self.items.is_empty() {
            return "Todo list is empty.".to_string();
        }
        let mut out = String::from("Todo list:");
        for item in &self.items {
            let mark = match item.status {
                TodoStatus::Pending => ' ',
                TodoStatus::Completed => 'x',
            };
            let _ = write!(out, "\n[{mark}] [{}] {}", item.id, item.content);
        }
        out
    }
}

/// Free-form notes kept by one agent.
#[derive(Debug, Default)]
pub struct Scratchpad {
    notes: Vec<String>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note and return its 1-based number.
    pub fn add(&mut self, content: &str) -> usize {
        self.notes.push(content.to_string());
        self.notes.len()
    }

    pub fn view_all(&self) -> String {
        if self.notes.is_empty() {
            return "Scratchpad is empty.".to_string();
        }
        let mut out = String::from("Scratchpad notes:");
        for (index, note) in self.notes.iter().enumerate() {
            let _ = write!(out, "\n\n--- Note {} ---\n{note}", index + 1);
        }
        out
    }
}

/// Shorten `content` to `max_chars` characters with a trailing ellipsis.
pub fn truncate_preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_after_delete() {
        let mut todos = TodoManager::new();
        assert_eq!(todos.add("first"), 1);
        assert_eq!(todos.add("second"), 2);
        assert!(todos.delete(1).is_some());
        assert_eq!(todos.add("third"), 3);
        assert!(todos.get(1).is_none());
        assert_eq!(todos.get(3).map(|item| item.content.as_str()), Some("third"));
    }

    #[test]
    fn view_all_marks_completed_items() {
        let mut todos = TodoManager::new();
        todos.add("read parser");
        todos.add("write tests");
        assert!(todos.complete(2));
        assert!(!todos.complete(9));
        assert_eq!(
            todos.view_all(),
            "Todo list:\n[ ] [1] read parser\n[x] [2] write tests"
        );
    }

    #[test]
    fn scratchpad_numbers_notes_from_one() {
        let mut pad = Scratchpad::new();
        assert_eq!(pad.view_all(), "Scratchpad is empty.");
        assert_eq!(pad.add("alpha"), 1);
        assert_eq!(pad.add("beta"), 2);
        assert!(pad.view_all().contains("--- Note 2 ---\nbeta"));
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(truncate_preview("short", 15), "short");
        assert_eq!(
            truncate_preview("a fairly long todo entry", 15),
            "a fairly long t..."
        );
        assert_eq!(truncate_preview("ééééé", 2), "éé...");
    }
}
