use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::{Int, Tensor},
};
use serde::{Deserialize, Serialize};

/// Class names in label order.
pub const LABELS: [&str; 3] = ["Normal", "AD", "MCI"];

/// Parses a manifest label, either a class name or its index.
pub fn parse_label(raw: &str) -> Option<usize> {
    if let Ok(index) = raw.parse::<usize>() {
        return (index < LABELS.len()).then_some(index);
    }
    match raw.to_ascii_uppercase().as_str() {
        "NORMAL" | "NC" | "CN" => Some(0),
        "AD" => Some(1),
        "MCI" => Some(2),
        _ => None,
    }
}

/// One single-channel volume, voxels in depth-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeItem {
    pub voxels: Vec<f32>,
    pub shape: [usize; 3],
    pub label: usize,
}

/// Stacks items into a batch, z-scoring each volume on the way.
#[derive(Debug, Clone)]
pub struct VolumeBatcher {
    normalize: bool,
}

impl VolumeBatcher {
    pub fn new() -> Self {
        Self { normalize: true }
    }

    /// Leaves voxel values as the dataset produced them.
    pub fn raw() -> Self {
        Self { normalize: false }
    }
}

impl Default for VolumeBatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct VolumeBatch<B: Backend> {
    /// `[batch, depth, height, width]`
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, VolumeItem, VolumeBatch<B>> for VolumeBatcher {
    fn batch(&self, items: Vec<VolumeItem>, device: &<B as Backend>::Device) -> VolumeBatch<B> {
        let images = items
            .iter()
            .map(|item| {
                let [depth, height, width] = item.shape;
                TensorData::new(item.voxels.clone(), [1, depth, height, width])
            })
            .map(|data| Tensor::<B, 4>::from_data(data.convert::<B::FloatElem>(), device))
            .map(|volume| {
                if self.normalize {
                    standardize(volume)
                } else {
                    volume
                }
            })
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                    device,
                )
            })
            .collect();

        let images = Tensor::cat(images, 0);
        let targets = Tensor::cat(targets, 0);

        VolumeBatch { images, targets }
    }
}

/// Zero mean and unit variance over the whole volume. A constant volume
/// becomes all zeros.
pub fn standardize<B: Backend>(volume: Tensor<B, 4>) -> Tensor<B, 4> {
    let dims = volume.dims();
    let flat = volume.reshape([1, dims.iter().product::<usize>()]);
    let (var, mean) = flat.clone().var_mean_bias(1);
    let std = var.sqrt();
    let std = std.clone().mask_fill(std.lower_equal_elem(1e-12), 1.0);

    flat.sub(mean).div(std).reshape(dims)
}
