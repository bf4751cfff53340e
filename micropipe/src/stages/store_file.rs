use crate::pipeline::{Emitter, ItemHandler, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, PipelineResult};
use std::fmt::Debug;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Appends one line per value to a file chosen per value, then forwards the
/// value.
///
/// A newline is added when the formatted line lacks one. Files are created
/// on first write.
pub struct StoreFile<T, L, N> {
    line_formatter: L,
    filename: N,
    truncate: bool,
    options: StageOptions<T>,
}

impl<T, L, N> StoreFile<T, L, N>
where
    L: Fn(&FlowValue<T>) -> String,
    N: Fn(&FlowValue<T>) -> PathBuf,
{
    pub fn new(line_formatter: L, filename: N) -> Self {
        Self {
            line_formatter,
            filename,
            truncate: false,
            options: StageOptions::default(),
        }
    }
}

impl<T, L, N> StoreFile<T, L, N> {
    fn open_options(&self) -> tokio::fs::OpenOptions {
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if self.truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        options
    }

    /// Overwrite the target file on every write instead of appending.
    pub fn overwrite(mut self) -> Self {
        self.truncate = true;
        self
    }
}

#[async_trait]
impl<T, L, N> ItemHandler for StoreFile<T, L, N>
where
    T: Clone + Debug + Send + Sync + 'static,
    L: Fn(&FlowValue<T>) -> String + Send + Sync + 'static,
    N: Fn(&FlowValue<T>) -> PathBuf + Send + Sync + 'static,
{
    type Input = T;
    type Output = T;

    fn kind(&self) -> &'static str {
        "StoreFile"
    }

    fn options(&self) -> &StageOptions<T> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<T> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<T>, out: &Emitter<T>) -> PipelineResult<bool> {
        let path = (self.filename)(item);
        let mut line = (self.line_formatter)(item);
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let mut file = self.open_options().open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        out.emit(item.value.clone(), item.meta.clone()).await?;
        Ok(true)
    }
}
