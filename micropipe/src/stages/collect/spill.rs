use super::BatchContainer;
use micropipe_shared::{PipelineError, PipelineResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Append-only deque that keeps its items in a temporary file, one JSON
/// document per line, instead of in memory.
///
/// The backing file is created on the first push and removed when the deque
/// is dropped.
pub struct SpillDeque<T> {
    dir: Option<PathBuf>,
    file: Option<BufWriter<NamedTempFile>>,
    len: usize,
    _items: PhantomData<fn() -> T>,
}

impl<T> SpillDeque<T> {
    pub fn new() -> Self {
        Self {
            dir: None,
            file: None,
            len: 0,
            _items: PhantomData,
        }
    }

    pub fn in_dir(dir: PathBuf) -> Self {
        Self {
            dir: Some(dir),
            ..Self::new()
        }
    }

    fn writer(&mut self) -> PipelineResult<&mut BufWriter<NamedTempFile>> {
        if self.file.is_none() {
            let file = match &self.dir {
                Some(dir) => NamedTempFile::new_in(dir)?,
                None => NamedTempFile::new()?,
            };
            self.file = Some(BufWriter::new(file));
        }
        self.file
            .as_mut()
            .ok_or_else(|| PipelineError::Internal("spill file missing after creation".into()))
    }
}

impl<T> Default for SpillDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> SpillDeque<T> {
    fn append(&mut self, item: &T) -> PipelineResult<()> {
        let writer = self.writer()?;
        serde_json::to_writer(&mut *writer, item)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<T: DeserializeOwned> SpillDeque<T> {
    /// Read every item back, in insertion order.
    pub fn into_items(self) -> PipelineResult<Vec<T>> {
        let Some(writer) = self.file else {
            return Ok(Vec::new());
        };
        let file = writer
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))?;

        let reader = BufReader::new(file.reopen()?);
        let mut items = Vec::with_capacity(self.len);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            items.push(serde_json::from_str(&line)?);
        }
        Ok(items)
    }
}

impl<T> BatchContainer<T> for SpillDeque<T>
where
    T: Serialize + Send + 'static,
{
    fn push(&mut self, item: T) -> Result<(), (T, PipelineError)> {
        match self.append(&item) {
            Ok(()) => {
                self.len += 1;
                Ok(())
            }
            Err(e) => Err((item, e)),
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl<T> fmt::Debug for SpillDeque<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillDeque")
            .field("len", &self.len)
            .field(
                "path",
                &self.file.as_ref().map(|w| w.get_ref().path().to_path_buf()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Match {
        id: u64,
        radiant_win: bool,
    }

    #[test]
    fn test_items_round_trip_in_order() {
        let dir = tempdir().unwrap();
        let mut deque = SpillDeque::in_dir(dir.path().to_path_buf());
        for id in 0..3 {
            BatchContainer::push(&mut deque, Match { id, radiant_win: id % 2 == 0 }).unwrap();
        }
        assert_eq!(BatchContainer::len(&deque), 3);

        let items = deque.into_items().unwrap();
        assert_eq!(items.iter().map(|m| m.id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(items[0].radiant_win);
    }

    #[test]
    fn test_empty_deque_creates_no_file() {
        let dir = tempdir().unwrap();
        let deque = SpillDeque::<u8>::in_dir(dir.path().to_path_buf());

        assert!(deque.file.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(deque.into_items().unwrap().is_empty());
    }

    #[test]
    fn test_file_removed_on_drop() {
        let dir = tempdir().unwrap();
        let mut deque = SpillDeque::in_dir(dir.path().to_path_buf());
        BatchContainer::push(&mut deque, 1u32).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(deque);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_dir_hands_item_back() {
        let dir = tempdir().unwrap();
        let mut deque = SpillDeque::in_dir(dir.path().join("gone"));

        let (item, err) = BatchContainer::push(&mut deque, 9u32).unwrap_err();
        assert_eq!(item, 9);
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
