pub mod generator;
pub mod layers;
pub mod mapping;
pub mod spade;

use burn::{module::Module, prelude::*};
use tracing::debug;

use crate::{
    config::RestorationOptions,
    error::Error,
    model::{
        generator::{GlobalGenerator, GlobalGeneratorConfig},
        mapping::{Mapping, MappingConfig},
    },
};

/// Degraded-domain VAE, latent mapping and clean-domain VAE chained together.
#[derive(Module, Debug)]
pub struct RestorationModel<B: Backend> {
    pub degraded_vae: GlobalGenerator<B>,
    pub mapping: Mapping<B>,
    pub clean_vae: GlobalGenerator<B>,
}
impl<B: Backend> RestorationModel<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let latent = self.degraded_vae.encode(input);
        let latent = self.mapping.forward(latent);

        self.clean_vae.decode(latent)
    }
}

#[derive(Config, Debug)]
pub struct RestorationModelConfig {
    pub degraded: GlobalGeneratorConfig,
    pub mapping: MappingConfig,
    pub clean: GlobalGeneratorConfig,
}
impl RestorationModelConfig {
    /// Both VAEs and the mapping share `options`; the mapping reads the
    /// degraded encoder's bottleneck.
    pub fn from_options(options: RestorationOptions, image_nc: usize) -> Self {
        let degraded = GlobalGeneratorConfig::new(image_nc, image_nc).with_options(options.clone());
        let clean = GlobalGeneratorConfig::new(image_nc, image_nc).with_options(options.clone());
        let mapping = MappingConfig::new(degraded.latent_channels()).with_options(options);

        Self::new(degraded, mapping, clean)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        let degraded_out = self.degraded.latent_channels();
        if degraded_out != self.mapping.nc {
            return Err(Error::invalid_config(format!(
                "mapping reads {} channels but the degraded encoder produces {degraded_out}",
                self.mapping.nc
            )));
        }

        let clean_in = self.clean.latent_channels();
        if self.mapping.output_channels() != clean_in {
            return Err(Error::invalid_config(format!(
                "mapping produces {} channels but the clean decoder expects {clean_in}",
                self.mapping.output_channels()
            )));
        }

        Ok(())
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> crate::error::Result<RestorationModel<B>> {
        self.validate()?;

        let degraded_vae = self.degraded.init(device)?;
        let mapping = self.mapping.init(device)?;
        let clean_vae = self.clean.init(device)?;
        debug!(
            latent_channels = self.mapping.nc,
            "built restoration model"
        );

        Ok(RestorationModel {
            degraded_vae,
            mapping,
            clean_vae,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn small_options() -> RestorationOptions {
        RestorationOptions::new().with_mc(64)
    }

    fn small_config(options: RestorationOptions) -> RestorationModelConfig {
        let vae = |options: RestorationOptions| {
            GlobalGeneratorConfig::new(3, 3)
                .with_ngf(16)
                .with_n_downsampling(3)
                .with_options(options)
        };
        let degraded = vae(options.clone());
        let clean = vae(options.clone());
        let mapping = MappingConfig::new(degraded.latent_channels())
            .with_n_blocks(1)
            .with_options(options);

        RestorationModelConfig::new(degraded, mapping, clean)
    }

    #[test]
    fn pipeline_restores_image_shape() {
        let device = Default::default();
        let model = small_config(small_options())
            .init::<TestBackend>(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [1, 3, 16, 16]);
    }

    #[test]
    fn pipeline_with_feature_bottleneck() {
        let device = Default::default();
        let config = small_config(small_options().with_feat_dim(16));
        assert_eq!(config.mapping.nc, 16);

        let model = config.init::<TestBackend>(&device).unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [1, 3, 16, 16]);
    }

    #[test]
    fn rejects_mismatched_latent_widths() {
        let mut config = small_config(small_options());
        config.mapping.nc = 32;

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn default_pipeline_lines_up() {
        let config = RestorationModelConfig::from_options(RestorationOptions::new(), 3);

        assert_eq!(config.mapping.nc, 64);
        assert!(config.validate().is_ok());
    }
}
