use burn::prelude::*;

/// Anything that maps a batch of single-channel volumes
/// `[batch, 1, depth, height, width]` to class logits `[batch, classes]`.
pub trait VolumeClassifier<B: Backend> {
    fn forward(&self, volumes: Tensor<B, 5>) -> Tensor<B, 2>;
}

/// Non-overlapping 3D max pooling. The kernel is clamped to each axis so
/// small volumes still pass through; trailing voxels that do not fill a
/// window are dropped.
#[derive(Module, Clone, Debug)]
pub struct MaxPool3d {
    kernel: usize,
}

impl MaxPool3d {
    pub fn new(kernel: usize) -> Self {
        Self { kernel }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [n, c, d, h, w] = x.dims();
        let [kd, kh, kw] = [d, h, w].map(|dim| self.kernel.min(dim).max(1));
        let [od, oh, ow] = [d / kd, h / kh, w / kw];

        // One axis at a time keeps every intermediate at rank 5 or less,
        // which the ndarray backend requires.
        let (d, h) = (od * kd, oh * kh);
        x.slice([0..n, 0..c, 0..d, 0..h, 0..ow * kw])
            .reshape([n * c, d, h, ow, kw])
            .max_dim(4)
            .reshape([n * c, d, oh, kh, ow])
            .max_dim(3)
            .reshape([n * c, od, kd, oh * ow])
            .max_dim(2)
            .reshape([n, c, od, oh, ow])
    }
}

/// `[n, c, d, h, w]` to `[n, c]` by averaging every spatial position.
pub fn global_avg_pool<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 2> {
    let [n, c, _, _, _] = x.dims();
    x.flatten::<3>(2, 4).mean_dim(2).reshape([n, c])
}
