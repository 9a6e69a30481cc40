use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
};
use tracing::info;

use crate::error::TrainError;

/// Writes `<prefix>.nll_<loss>.epoch_<i>` files.
///
/// burn's file recorders replace whatever follows the last `.` with their own
/// extension, which would drop the epoch from the name, so records are
/// serialized to bytes and written verbatim.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    prefix: String,
}

impl Checkpointer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn path_for(&self, valid_loss: f64, epoch: usize) -> PathBuf {
        PathBuf::from(format!("{}.nll_{valid_loss:.2}.epoch_{epoch}", self.prefix))
    }

    pub fn save<B: Backend, M: Module<B>>(
        &self,
        model: &M,
        valid_loss: f64,
        epoch: usize,
    ) -> Result<PathBuf, TrainError> {
        let path = self.path_for(valid_loss, epoch);
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = Recorder::<B>::record(&recorder, model.clone().into_record(), ())
            .map_err(|err| TrainError::Checkpoint {
                path: path.clone(),
                reason: format!("{err:?}"),
            })?;
        fs::write(&path, bytes)?;
        info!("Saved checkpoint {}", path.display());

        Ok(path)
    }
}

/// Restores parameters written by [`Checkpointer::save`] into `model`.
pub fn load<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, TrainError> {
    let failed = |reason: String| TrainError::Checkpoint {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = fs::read(path).map_err(|err| failed(err.to_string()))?;
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record: M::Record = Recorder::<B>::load(&recorder, bytes, device)
        .map_err(|err| failed(format!("{err:?}")))?;
    info!("Restored parameters from {}", path.display());

    Ok(model.load_record(record))
}
