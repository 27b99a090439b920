use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::{
    config::RestorationOptions,
    model::layers::{resize, ParamFreeBatchNorm, ParamFreeBatchNormConfig, ResizeMode},
};

/// Spatially-adaptive denormalization.
///
/// `x` is normalized without learned affine parameters, then modulated per
/// pixel by `gamma` and `beta` maps predicted from the (resized) semantic
/// map and degraded image: `norm(x) * (1 + gamma) + beta`.
#[derive(Module, Debug)]
pub struct Spade<B: Backend> {
    mlp_shared: Conv2d<B>,
    mlp_gamma: Conv2d<B>,
    mlp_beta: Conv2d<B>,
    relu: Relu,
    norm: ParamFreeBatchNorm<B>,
    no_parsing_map: bool,
}
impl<B: Backend> Spade<B> {
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        segmap: Tensor<B, 4>,
        degraded_image: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, _, height, width] = input.dims();
        let condition = self.condition(segmap, degraded_image, [height, width]);

        let actv = self.relu.forward(self.mlp_shared.forward(condition));
        let gamma = self.mlp_gamma.forward(actv.clone());
        let beta = self.mlp_beta.forward(actv);

        let normalized = self.norm.forward(input);

        normalized.mul(gamma.add_scalar(1.0)).add(beta)
    }

    /// Input of the shared convolution at `size`: the degraded image resized
    /// bilinearly, preceded by the segmap resized to the nearest label.
    pub fn condition(
        &self,
        segmap: Tensor<B, 4>,
        degraded_image: Tensor<B, 4>,
        size: [usize; 2],
    ) -> Tensor<B, 4> {
        let degraded_image = resize(degraded_image, size, ResizeMode::Bilinear);
        if self.no_parsing_map {
            return degraded_image;
        }

        let segmap = resize(segmap, size, ResizeMode::Nearest);
        Tensor::cat(vec![segmap, degraded_image], 1)
    }
}

#[derive(Config, Debug)]
pub struct SpadeConfig {
    /// Channels of the feature map being normalized.
    pub norm_nc: usize,
    /// Channels of the segmentation map.
    pub label_nc: usize,
    #[config(default = 3)]
    pub image_nc: usize,
    #[config(default = 128)]
    pub hidden: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = false)]
    pub no_parsing_map: bool,
}
impl SpadeConfig {
    pub fn from_options(options: &RestorationOptions, norm_nc: usize, label_nc: usize) -> Self {
        Self::new(norm_nc, label_nc).with_no_parsing_map(options.no_parsing_map)
    }

    /// Channels fed to the shared conditioning convolution.
    pub fn condition_channels(&self) -> usize {
        if self.no_parsing_map {
            self.image_nc
        } else {
            self.label_nc + self.image_nc
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Spade<B> {
        let pw = self.kernel_size / 2;
        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [self.kernel_size, self.kernel_size])
                .with_padding(PaddingConfig2d::Explicit(pw, pw))
                .init(device)
        };

        Spade {
            mlp_shared: conv([self.condition_channels(), self.hidden]),
            mlp_gamma: conv([self.hidden, self.norm_nc]),
            mlp_beta: conv([self.hidden, self.norm_nc]),
            relu: Relu::new(),
            norm: ParamFreeBatchNormConfig::new(self.norm_nc).init(device),
            no_parsing_map: self.no_parsing_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use burn::nn::Initializer;

    #[test]
    fn output_matches_feature_map_shape() {
        let device = Default::default();
        let spade = SpadeConfig::new(16, 18)
            .with_hidden(32)
            .init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::ones([2, 16, 8, 8], &device);
        let segmap = Tensor::<TestBackend, 4>::ones([2, 18, 32, 32], &device);
        let degraded = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);

        assert_eq!(spade.forward(x, segmap, degraded).dims(), [2, 16, 8, 8]);
    }

    #[test]
    fn without_parsing_map_only_image_conditions() {
        let device = Default::default();
        let options = RestorationOptions::new().with_no_parsing_map(true);
        let config = SpadeConfig::from_options(&options, 4, 18).with_hidden(8);
        assert_eq!(config.condition_channels(), 3);

        let spade = config.init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::ones([1, 4, 6, 6], &device);
        // Width of the ignored map does not matter.
        let segmap = Tensor::<TestBackend, 4>::ones([1, 1, 12, 12], &device);
        let degraded = Tensor::<TestBackend, 4>::ones([1, 3, 12, 12], &device);

        assert_eq!(spade.forward(x, segmap, degraded).dims(), [1, 4, 6, 6]);
    }

    #[test]
    fn condition_keeps_labels_and_blends_image() {
        let device = Default::default();
        let spade = SpadeConfig::new(2, 1)
            .with_image_nc(1)
            .with_hidden(4)
            .init::<TestBackend>(&device);
        let segmap = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0], [3.0, 4.0]]]], &device);
        let image = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 4.0], [8.0, 12.0]]]], &device);

        let condition = spade.condition(segmap, image, [4, 4]);
        assert_eq!(condition.dims(), [1, 2, 4, 4]);
        let values = condition.into_data().to_vec::<f32>().unwrap();

        let (labels, pixels) = values.split_at(16);
        assert_eq!(&labels[0..4], &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(&labels[4..8], &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(&labels[12..16], &[3.0, 3.0, 4.0, 4.0]);
        assert_eq!(&pixels[0..4], &[0.0, 1.0, 3.0, 4.0]);
        assert_eq!(&pixels[4..8], &[2.0, 3.0, 5.0, 6.0]);
    }

    #[test]
    fn condition_without_parsing_map_is_the_image() {
        let device = Default::default();
        let spade = SpadeConfig::new(2, 5)
            .with_no_parsing_map(true)
            .with_hidden(4)
            .init::<TestBackend>(&device);
        let segmap = Tensor::<TestBackend, 4>::ones([1, 5, 2, 2], &device);
        let image = Tensor::<TestBackend, 4>::ones([1, 3, 2, 2], &device);

        assert_eq!(spade.condition(segmap, image, [6, 6]).dims(), [1, 3, 6, 6]);
    }

    #[test]
    fn zero_modulation_is_plain_normalization() {
        let device = Default::default();
        let zero_conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_initializer(Initializer::Zeros)
                .init::<TestBackend>(&device)
        };
        let spade = Spade {
            mlp_shared: zero_conv([5, 8]),
            mlp_gamma: zero_conv([8, 2]),
            mlp_beta: zero_conv([8, 2]),
            relu: Relu::new(),
            norm: ParamFreeBatchNormConfig::new(2).init(&device),
            no_parsing_map: false,
        };

        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[[1.0, -2.0], [3.0, 4.0]], [[0.5, 0.5], [0.5, 0.5]]]],
            &device,
        );
        let segmap = Tensor::<TestBackend, 4>::ones([1, 2, 4, 4], &device);
        let degraded = Tensor::<TestBackend, 4>::ones([1, 3, 4, 4], &device);

        let output = spade
            .forward(x.clone(), segmap, degraded)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let scale = 1.0 / (1.0f32 + 1e-3).sqrt();
        let expected = x.into_data().to_vec::<f32>().unwrap();
        for (out, value) in output.iter().zip(expected) {
            assert!((out - value * scale).abs() < 1e-5);
        }
    }
}
