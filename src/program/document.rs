//! Program documents: the JSON file format for authored programs.
//!
//! A document is a flat array of `{time, axis, action, args}` records. Rows are kept
//! sorted by time; loading re-sorts (stably) so hand-edited files play back in time
//! order while equal times keep their authored order.

use super::instruction::{Action, Instruction};
use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// An editable, time-sorted list of instructions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramDocument {
    instructions: Vec<Instruction>,
}

impl ProgramDocument {
    /// Builds a document, sorting rows by time.
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let mut doc = Self { instructions };
        doc.sort();
        doc
    }

    fn sort(&mut self) {
        self.instructions.sort_by_key(|i| i.time_ms);
    }

    /// Rows in time order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the document has no rows.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Adds a row and restores time order.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
        self.sort();
    }

    /// Adds a row with the action's default arguments.
    pub fn add(&mut self, time_ms: u64, axis: impl Into<String>, action: Action) {
        self.push(Instruction::with_defaults(time_ms, axis, action));
    }

    /// Removes and returns the row at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Instruction> {
        (index < self.instructions.len()).then(|| self.instructions.remove(index))
    }

    /// Parses a JSON document.
    pub fn from_json(text: &str) -> AppResult<Self> {
        let instructions: Vec<Instruction> = serde_json::from_str(text)?;
        Ok(Self::new(instructions))
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads a document from disk.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Writes the document to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl From<ProgramDocument> for Vec<Instruction> {
    fn from(doc: ProgramDocument) -> Self {
        doc.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MotionError;

    #[test]
    fn load_resorts_stably() {
        let doc = ProgramDocument::from_json(
            r#"[
                {"time": 500, "axis": "A", "action": "Stop", "args": []},
                {"time": 0, "axis": "B", "action": "Jog", "args": [1]},
                {"time": 0, "axis": "A", "action": "Jog", "args": [2]}
            ]"#,
        )
        .unwrap();
        let order: Vec<(&str, u64)> = doc
            .instructions()
            .iter()
            .map(|i| (i.axis.as_str(), i.time_ms))
            .collect();
        assert_eq!(order, vec![("B", 0), ("A", 0), ("A", 500)]);
    }

    #[test]
    fn editing_keeps_time_order() {
        let mut doc = ProgramDocument::default();
        doc.add(300, "A", Action::Stop);
        doc.add(100, "A", Action::PingPong);
        assert_eq!(doc.instructions()[0].args, vec![1.0, 50.0, 1.0]);
        assert_eq!(doc.remove(1).map(|i| i.action), Some(Action::Stop));
        assert_eq!(doc.remove(5), None);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn malformed_json_is_a_document_error() {
        assert!(matches!(
            ProgramDocument::from_json(r#"[{"time": "soon"}]"#),
            Err(MotionError::Document(_))
        ));
    }
}
