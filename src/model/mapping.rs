use burn::{module::Module, prelude::*};
use tracing::debug;

use crate::{
    config::RestorationOptions,
    error::Error,
    model::layers::{ActivationKind, NormKind, PaddingType, Stack, StackBuilder},
};

const BASE_CHANNELS: usize = 64;
const N_UP: usize = 4;

/// Maps latent features of one domain onto another.
///
/// Widens the input through four 3x3 convolutions, runs a chain of
/// (optionally dilated) residual blocks at the widest point and narrows
/// back down to 64 channels (or a smaller `feat_dim`). Spatial size is
/// preserved.
#[derive(Module, Debug)]
pub struct Mapping<B: Backend> {
    model: Stack<B>,
}
impl<B: Backend> Mapping<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.model.forward(input)
    }

    pub fn stack(&self) -> &Stack<B> {
        &self.model
    }
}

#[derive(Config, Debug)]
pub struct MappingConfig {
    /// Channels of the incoming feature map.
    pub nc: usize,
    #[config(default = 64)]
    pub mc: usize,
    #[config(default = 3)]
    pub n_blocks: usize,
    #[config(default = "PaddingType::Reflect")]
    pub padding_type: PaddingType,
    #[config(default = "NormKind::Batch")]
    pub norm: NormKind,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
    #[config(default = "RestorationOptions::new()")]
    pub options: RestorationOptions,
}
impl MappingConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        self.options.validate()?;

        if self.nc == 0 || self.mc == 0 {
            return Err(Error::invalid_config("nc and mc must be positive"));
        }

        Ok(())
    }

    /// Width the stack produces.
    pub fn output_channels(&self) -> usize {
        match self.options.feat_dim() {
            Some(feat_dim) if feat_dim < BASE_CHANNELS => feat_dim,
            _ => BASE_CHANNELS,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::error::Result<Mapping<B>> {
        self.validate()?;

        let mut model = StackBuilder::<B>::new(
            self.nc,
            self.padding_type.clone(),
            self.norm.clone(),
            self.activation.clone(),
            device,
        );

        for i in 0..N_UP {
            let oc = (BASE_CHANNELS << (i + 1)).min(self.mc);
            model = model.conv(oc, 3, 1, 1).norm_activation();
        }

        let dilation = self.options.mapping_net_dilation;
        for _ in 0..self.n_blocks {
            model = model.resnet(dilation);
        }

        for i in 0..N_UP - 1 {
            let oc = (BASE_CHANNELS << (3 - i)).min(self.mc);
            model = model.conv(oc, 3, 1, 1).norm_activation();
        }
        model = model.conv(BASE_CHANNELS, 3, 1, 1);

        if let Some(feat_dim) = self.options.feat_dim().filter(|&dim| dim < BASE_CHANNELS) {
            model = model.norm_activation().conv(feat_dim, 1, 1, 0);
        }

        debug!(
            blocks = self.n_blocks,
            dilation,
            channels = model.channels(),
            "built mapping network"
        );

        Ok(Mapping {
            model: model.build(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    #[test]
    fn keeps_spatial_size() {
        let device = Default::default();
        let config = MappingConfig::new(16).with_mc(32).with_n_blocks(2);
        let mapping = config.init::<TestBackend>(&device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 16, 8, 8], &device);
        let output = mapping.forward(input);

        assert_eq!(config.output_channels(), 64);
        assert_eq!(output.dims(), [2, 64, 8, 8]);
    }

    #[test]
    fn widths_rise_then_fall_under_cap() {
        let device = Default::default();
        let mapping = MappingConfig::new(8)
            .with_mc(128)
            .with_n_blocks(1)
            .init::<TestBackend>(&device)
            .unwrap();

        let convs = mapping
            .stack()
            .describe()
            .into_iter()
            .filter(|stage| stage.starts_with("conv") || stage.starts_with("resnet"))
            .collect::<Vec<_>>();
        assert_eq!(
            convs,
            vec![
                "conv3x3(8 -> 128)",
                "conv3x3(128 -> 128)",
                "conv3x3(128 -> 128)",
                "conv3x3(128 -> 128)",
                "resnet(128, dilation 1)",
                "conv3x3(128 -> 128)",
                "conv3x3(128 -> 128)",
                "conv3x3(128 -> 128)",
                "conv3x3(128 -> 64)",
            ]
        );
    }

    #[test]
    fn small_feat_dim_adds_projection() {
        let device = Default::default();
        let config = MappingConfig::new(4)
            .with_mc(16)
            .with_n_blocks(1)
            .with_options(RestorationOptions::new().with_feat_dim(8));
        let mapping = config.init::<TestBackend>(&device).unwrap();

        let output = mapping.forward(Tensor::zeros([1, 4, 6, 6], &device));
        assert_eq!(config.output_channels(), 8);
        assert_eq!(output.dims(), [1, 8, 6, 6]);
        assert_eq!(
            mapping.stack().describe().last().map(String::as_str),
            Some("conv1x1(64 -> 8)")
        );
    }

    #[test]
    fn wide_feat_dim_is_ignored() {
        let config = MappingConfig::new(4).with_options(RestorationOptions::new().with_feat_dim(64));

        assert_eq!(config.output_channels(), 64);
    }

    #[test]
    fn residual_blocks_use_configured_dilation() {
        let device = Default::default();
        let mapping = MappingConfig::new(4)
            .with_mc(16)
            .with_n_blocks(2)
            .with_options(RestorationOptions::new().with_mapping_net_dilation(2))
            .init::<TestBackend>(&device)
            .unwrap();

        let blocks = mapping
            .stack()
            .describe()
            .into_iter()
            .filter(|stage| stage.starts_with("resnet"))
            .collect::<Vec<_>>();
        assert_eq!(blocks, vec!["resnet(16, dilation 2)"; 2]);
        assert_eq!(
            mapping.forward(Tensor::zeros([1, 4, 8, 8], &device)).dims(),
            [1, 64, 8, 8]
        );
    }
}
