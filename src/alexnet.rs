use burn::{
    nn::{
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig3d, Relu,
        conv::{Conv3d, Conv3dConfig},
    },
    prelude::*,
};

use crate::model::{MaxPool3d, VolumeClassifier, global_avg_pool};

#[derive(Module, Debug)]
pub struct AlexNet3d<B: Backend> {
    conv1: Conv3d<B>,
    conv2: Conv3d<B>,
    conv3: Conv3d<B>,
    conv4: Conv3d<B>,
    pool: MaxPool3d,
    activation: Relu,
    dropout: Dropout,
    fc1: Linear<B>,
    fc2: Linear<B>,
}

impl<B: Backend> VolumeClassifier<B> for AlexNet3d<B> {
    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        let x = self.pool.forward(self.activation.forward(self.conv1.forward(x)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));
        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.pool.forward(self.activation.forward(self.conv4.forward(x)));

        let x = self.dropout.forward(global_avg_pool(x));
        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct AlexNet3dConfig {
    num_classes: usize,
    #[config(default = 1)]
    input_channel: usize,
    #[config(default = 32)]
    base_channels: usize,
    #[config(default = 64)]
    hidden: usize,
    #[config(default = 0.5)]
    dropout: f64,
}

impl AlexNet3dConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AlexNet3d<B> {
        let c = self.base_channels;
        let conv = |channels: [usize; 2], kernel: usize, stride: usize| -> Conv3d<B> {
            let pad = kernel / 2;
            Conv3dConfig::new(channels, [kernel; 3])
                .with_stride([stride; 3])
                .with_padding(PaddingConfig3d::Explicit(pad, pad, pad))
                .init(device)
        };

        AlexNet3d {
            conv1: conv([self.input_channel, c], 5, 2),
            conv2: conv([c, c * 2], 3, 1),
            conv3: conv([c * 2, c * 4], 3, 1),
            conv4: conv([c * 4, c * 4], 3, 1),
            pool: MaxPool3d::new(2),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(c * 4, self.hidden).init(device),
            fc2: LinearConfig::new(self.hidden, self.num_classes).init(device),
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
        let model = AlexNet3dConfig::new(3)
            .with_base_channels(4)
            .with_hidden(8)
            .init::<TestBackend>(&device);

        let logits = model.forward(Tensor::zeros([2, 1, 16, 16, 16], &device));

        assert_eq!(logits.dims(), [2, 3]);
    }

    #[test]
    fn accepts_volumes_smaller_than_the_pooling_stack() {
        let device = Default::default();
        let model = AlexNet3dConfig::new(2)
            .with_base_channels(2)
            .with_hidden(4)
            .init::<TestBackend>(&device);

        let logits = model.forward(Tensor::ones([1, 1, 3, 3, 3], &device));

        assert_eq!(logits.dims(), [1, 2]);
    }
}
