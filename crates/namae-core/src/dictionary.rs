//! Bidirectional string-to-id mapping for attribute vocabularies.

use std::collections::HashMap;

/// Interns attribute names to dense u32 ids, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    str_to_id: HashMap<String, u32>,
    id_to_str: Vec<String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from an ordered name list (checkpoint load).
    pub fn from_names(names: Vec<String>) -> Self {
        let str_to_id = names
            .iter()
            .enumerate()
            .map(|(id, s)| (s.clone(), id as u32))
            .collect();
        Self {
            str_to_id,
            id_to_str: names,
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }

    /// Lookup without inserting. Unknown names are simply absent; at
    /// inference time their features contribute nothing.
    pub fn get(&self, s: &str) -> Option<u32> {
        self.str_to_id.get(s).copied()
    }

    /// Get the id for a name, interning it if new.
    pub fn get_or_insert(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.str_to_id.get(s) {
            id
        } else {
            let id = self.id_to_str.len() as u32;
            self.str_to_id.insert(s.to_string(), id);
            self.id_to_str.push(s.to_string());
            id
        }
    }

    /// Names in id order.
    pub fn names(&self) -> &[String] {
        &self.id_to_str
    }
}
