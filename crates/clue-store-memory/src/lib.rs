use clue_core::{checked_range, Clue, ClueError, ClueStore, Position};
use parking_lot::RwLock;

/// Process-lifetime clue store.
///
/// One lock guards the whole sequence: readers share it, every mutation holds it
/// exclusively for both the bounds check and the write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clues: RwLock<Vec<Clue>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<Vec<Clue>> for MemoryStore {
    fn from(clues: Vec<Clue>) -> Self {
        Self { clues: RwLock::new(clues) }
    }
}

impl ClueStore for MemoryStore {
    fn append(&self, clue: Clue) -> Position {
        let mut clues = self.clues.write();
        clues.push(clue);
        Position::from_index(clues.len() - 1)
    }

    fn get(&self, position: Position) -> Result<Clue, ClueError> {
        self.clues.read().get(position.index()).cloned().ok_or_else(ClueError::not_found)
    }

    fn replace(&self, position: Position, clue: Clue) -> Result<Clue, ClueError> {
        let mut clues = self.clues.write();
        let slot = clues.get_mut(position.index()).ok_or_else(ClueError::not_found)?;
        Ok(std::mem::replace(slot, clue))
    }

    fn remove(&self, position: Position) -> Result<Clue, ClueError> {
        let mut clues = self.clues.write();
        if position.index() >= clues.len() {
            return Err(ClueError::not_found());
        }
        Ok(clues.remove(position.index()))
    }

    fn range(&self, start: usize, count: Option<usize>) -> Result<Vec<Clue>, ClueError> {
        let clues = self.clues.read();
        let count = count.unwrap_or(clues.len());
        let range = checked_range(start, count, clues.len())?;
        Ok(clues[range].to_vec())
    }

    fn len(&self) -> usize {
        self.clues.read().len()
    }
}
