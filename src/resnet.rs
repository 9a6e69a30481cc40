use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig3d, Relu,
        conv::{Conv3d, Conv3dConfig},
    },
    prelude::*,
};

use crate::model::{MaxPool3d, VolumeClassifier, global_avg_pool};

/// ResNet18 with every 2D operation swapped for its volumetric counterpart.
#[derive(Module, Debug)]
pub struct ResNet3d<B: Backend> {
    conv1: Conv3d<B>,
    bn1: BatchNorm<B, 3>,
    activation: Relu,
    maxpool: MaxPool3d,

    layer1: ResNetLayer<B>,
    layer2: ResNetLayer<B>,
    layer3: ResNetLayer<B>,
    layer4: ResNetLayer<B>,
    fc: Linear<B>,
}

impl<B: Backend> VolumeClassifier<B> for ResNet3d<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        self.fc.forward(global_avg_pool(x))
    }
}

#[derive(Config, Debug)]
pub struct ResNet3dConfig {
    num_classes: usize,
    #[config(default = 1)]
    input_channel: usize,
    /// Channels after the stem; doubled by each later layer.
    #[config(default = 32)]
    base_planes: usize,
}

impl ResNet3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet3d<B> {
        let planes = [1, 2, 4, 8].map(|scale| self.base_planes * scale);
        ResNet3d {
            conv1: Conv3dConfig::new([self.input_channel, planes[0]], [7, 7, 7])
                .with_stride([2, 2, 2])
                .with_padding(PaddingConfig3d::Explicit(3, 3, 3))
                .with_bias(false)
                .with_initializer(nn::Initializer::KaimingNormal {
                    gain: (2.0_f64).sqrt(),
                    fan_out_only: true,
                })
                .init(device),
            bn1: BatchNormConfig::new(planes[0]).init(device),
            activation: Relu::new(),
            maxpool: MaxPool3d::new(2),

            layer1: ResNetLayerConfig::new(planes[0], planes[0], 1).init(device),
            layer2: ResNetLayerConfig::new(planes[0], planes[1], 2).init(device),
            layer3: ResNetLayerConfig::new(planes[1], planes[2], 2).init(device),
            layer4: ResNetLayerConfig::new(planes[2], planes[3], 2).init(device),
            fc: LinearConfig::new(planes[3], self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
struct ResNetLayer<B: Backend> {
    blocks: [BasicBlock<B>; 2],
}

impl<B: Backend> ResNetLayer<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.blocks[0].forward(x);

        self.blocks[1].forward(x)
    }
}

#[derive(Config, Debug)]
struct ResNetLayerConfig {
    in_planes: usize,
    out_planes: usize,
    stride: usize,
}

impl ResNetLayerConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> ResNetLayer<B> {
        let downsample = if self.stride != 1 || self.in_planes != self.out_planes {
            Some(DownSampleConfig::new(
                self.in_planes,
                self.out_planes,
                self.stride,
            ))
        } else {
            None
        };
        ResNetLayer {
            blocks: [
                BasicBlockConfig::new(self.in_planes, self.out_planes)
                    .with_stride(self.stride)
                    .with_downsample(downsample)
                    .init(device),
                BasicBlockConfig::new(self.out_planes, self.out_planes).init(device),
            ],
        }
    }
}

#[derive(Module, Debug)]
struct BasicBlock<B: Backend> {
    conv1: Conv3d<B>,
    bn1: BatchNorm<B, 3>,
    conv2: Conv3d<B>,
    bn2: BatchNorm<B, 3>,
    shortcut: Option<DownSample<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let shortcut = match &self.shortcut {
            Some(shortcut) => shortcut.forward(x.clone()),
            None => x.clone(),
        };

        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);

        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        debug_assert_eq!(
            x.dims(),
            shortcut.dims(),
            "BasicBlock: main path and shortcut disagree"
        );

        self.activation.forward(x + shortcut)
    }
}

#[derive(Config, Debug)]
struct BasicBlockConfig {
    in_planes: usize,
    out_planes: usize,
    #[config(default = 1)]
    stride: usize,
    #[config(default = "None")]
    downsample: Option<DownSampleConfig>,
}

impl BasicBlockConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> BasicBlock<B> {
        let stride = [self.stride; 3];
        BasicBlock {
            conv1: Conv3dConfig::new([self.in_planes, self.out_planes], [3, 3, 3])
                .with_stride(stride)
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(self.out_planes).init(device),
            conv2: Conv3dConfig::new([self.out_planes, self.out_planes], [3, 3, 3])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(self.out_planes).init(device),
            shortcut: self.downsample.as_ref().map(|ds| ds.init(device)),
            activation: Relu::new(),
        }
    }
}

/// 1x1x1 strided projection so the shortcut matches the main path.
#[derive(Module, Debug)]
struct DownSample<B: Backend> {
    conv: Conv3d<B>,
    bn: BatchNorm<B, 3>,
}

impl<B: Backend> DownSample<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv.forward(x);
        self.bn.forward(x)
    }
}

#[derive(Config, Debug)]
struct DownSampleConfig {
    in_planes: usize,
    out_planes: usize,
    stride: usize,
}

impl DownSampleConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> DownSample<B> {
        DownSample {
            conv: Conv3dConfig::new([self.in_planes, self.out_planes], [1, 1, 1])
                .with_stride([self.stride; 3])
                .init(device),
            bn: BatchNormConfig::new(self.out_planes).init(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn maps_volumes_to_class_logits() {
        let device = Default::default();
        let model = ResNet3dConfig::new(3)
            .with_base_planes(4)
            .init::<TestBackend>(&device);

        let logits = model.forward(Tensor::zeros([2, 1, 16, 16, 16], &device));

        assert_eq!(logits.dims(), [2, 3]);
    }

    #[test]
    fn first_layer_keeps_shape_and_later_layers_downsample() {
        let device = Default::default();
        let keep = ResNetLayerConfig::new(4, 4, 1).init::<TestBackend>(&device);
        let down = ResNetLayerConfig::new(4, 8, 2).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 5>::ones([1, 4, 4, 4, 4], &device);

        assert!(keep.blocks[0].shortcut.is_none());
        assert_eq!(keep.forward(x.clone()).dims(), [1, 4, 4, 4, 4]);
        assert!(down.blocks[0].shortcut.is_some());
        assert_eq!(down.forward(x).dims(), [1, 8, 2, 2, 2]);
    }
}
