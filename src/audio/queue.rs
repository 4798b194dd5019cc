use std::{collections::VecDeque, str::FromStr};
use tracing::{debug, info};

use super::track::QueueEntry;
use crate::error::QueueError;

/// Posición dentro de la cola, contada desde 1 como se muestra al usuario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Index(usize),
    Last,
}

impl FromStr for Position {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "last" || s == "ultima" || s == "última" {
            return Ok(Position::Last);
        }
        s.parse::<usize>()
            .map(Position::Index)
            .map_err(|_| QueueError::InvalidPosition { len: 0 })
    }
}

/// Cola FIFO de pendientes de una sesión
#[derive(Debug)]
pub struct PendingQueue {
    items: VecDeque<QueueEntry>,
    max_size: usize,
}

impl PendingQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega al final y devuelve la posición (desde 1)
    pub fn push(&mut self, entry: QueueEntry) -> Result<usize, QueueError> {
        if self.items.len() >= self.max_size {
            return Err(QueueError::QueueFull { max: self.max_size });
        }

        info!("➕ Agregado a la cola: {}", entry.title());
        self.items.push_back(entry);
        Ok(self.items.len())
    }

    /// Siguiente en orden FIFO
    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        let next = self.items.pop_front();
        if let Some(ref entry) = next {
            debug!("➡️ Siguiente en cola: {}", entry.title());
        }
        next
    }

    pub fn remove_at(&mut self, position: Position) -> Result<QueueEntry, QueueError> {
        let len = self.items.len();
        if len == 0 {
            return Err(QueueError::EmptyQueue);
        }

        let index = match position {
            Position::Last => len - 1,
            Position::Index(n) if n >= 1 && n <= len => n - 1,
            Position::Index(_) => return Err(QueueError::InvalidPosition { len }),
        };

        let removed = self
            .items
            .remove(index)
            .ok_or(QueueError::InvalidPosition { len })?;
        debug!("❌ Eliminado de la posición {}: {}", index + 1, removed.title());
        Ok(removed)
    }

    /// Vacía los pendientes; no toca lo que suena
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada: {} canciones", cleared);
        cleared
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Vista inmutable de la cola para mostrar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueListing {
    pub items: Vec<QueueEntry>,
}

impl QueueListing {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Obtiene una página específica de la cola
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage<'_> {
        let items_per_page = items_per_page.max(1);
        let total_pages = self.items.len().div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.items.len());

        QueuePage {
            items: self.items[start..end]
                .iter()
                .enumerate()
                .map(|(i, entry)| (start + i + 1, entry))
                .collect(),
            current_page,
            total_pages,
        }
    }
}

#[derive(Debug)]
pub struct QueuePage<'a> {
    pub items: Vec<(usize, &'a QueueEntry)>,
    pub current_page: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::sample_entry;
    use pretty_assertions::assert_eq;

    fn titles(queue: &PendingQueue) -> Vec<String> {
        queue.snapshot().iter().map(|e| e.title().to_string()).collect()
    }

    fn queue_of(names: &[&str]) -> PendingQueue {
        let mut queue = PendingQueue::new(10);
        for name in names {
            queue.push(sample_entry(name)).unwrap();
        }
        queue
    }

    #[test]
    fn push_reports_one_based_positions() {
        let mut queue = PendingQueue::new(10);
        assert_eq!(queue.push(sample_entry("a")), Ok(1));
        assert_eq!(queue.push(sample_entry("b")), Ok(2));
        assert_eq!(queue.pop_front().map(|e| e.track.title), Some("a".to_string()));
        assert_eq!(titles(&queue), vec!["b"]);
    }

    #[test]
    fn remove_last_and_out_of_range() {
        let mut queue = queue_of(&["x", "y", "z"]);

        let removed = queue.remove_at(Position::Last).unwrap();
        assert_eq!(removed.title(), "z");
        assert_eq!(titles(&queue), vec!["x", "y"]);

        assert_eq!(
            queue.remove_at(Position::Index(5)),
            Err(QueueError::InvalidPosition { len: 2 })
        );
        assert_eq!(
            queue.remove_at(Position::Index(0)),
            Err(QueueError::InvalidPosition { len: 2 })
        );
        assert_eq!(titles(&queue), vec!["x", "y"]);
    }

    #[test]
    fn remove_from_empty_queue() {
        let mut queue = PendingQueue::new(10);
        assert_eq!(queue.remove_at(Position::Last), Err(QueueError::EmptyQueue));
    }

    #[test]
    fn rejects_when_full() {
        let mut queue = PendingQueue::new(1);
        queue.push(sample_entry("a")).unwrap();
        assert_eq!(
            queue.push(sample_entry("b")),
            Err(QueueError::QueueFull { max: 1 })
        );
    }

    #[test]
    fn parses_positions() {
        assert_eq!("last".parse::<Position>(), Ok(Position::Last));
        assert_eq!(" 3 ".parse::<Position>(), Ok(Position::Index(3)));
        assert!("tercera".parse::<Position>().is_err());
    }

    #[test]
    fn pages_keep_global_numbering() {
        let queue = queue_of(&["a", "b", "c", "d", "e"]);
        let listing = QueueListing {
            items: queue.snapshot(),
        };

        let page = listing.get_page(2, 2);
        assert_eq!(page.total_pages, 3);
        let numbers: Vec<usize> = page.items.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![3, 4]);

        let last = listing.get_page(99, 2);
        assert_eq!(last.current_page, 3);
        assert_eq!(last.items.len(), 1);
    }
}
