use burn::config::Config;

use crate::error::Error;

/// Options shared by the SPADE layer, the generator and the mapping network.
///
/// Mirrors the option object a training driver hands to every sub-network;
/// each module only reads the fields it cares about.
#[derive(Config, Debug, PartialEq)]
pub struct RestorationOptions {
    /// SPADE conditions on the degraded image only.
    #[config(default = false)]
    pub no_parsing_map: bool,
    /// Number of outer down/up stages built without residual blocks.
    #[config(default = 1)]
    pub start_r: usize,
    /// Upper bound on every channel width.
    #[config(default = 64)]
    pub mc: usize,
    /// Bottleneck branch: 32 adds one more stride-2 stage, 64 adds a residual block.
    #[config(default = 64)]
    pub spatio_size: usize,
    /// Width of the bottleneck projection; disabled when not positive.
    #[config(default = "-1")]
    pub feat_dim: isize,
    /// Decoder emits raw logits instead of a `tanh` image.
    #[config(default = false)]
    pub use_segmentation_model: bool,
    #[config(default = 1)]
    pub mapping_net_dilation: usize,
}

impl RestorationOptions {
    /// Projection width of the bottleneck, if enabled.
    pub fn feat_dim(&self) -> Option<usize> {
        (self.feat_dim > 0).then_some(self.feat_dim as usize)
    }

    /// Caps a channel count at `mc`.
    pub fn cap(&self, channels: usize) -> usize {
        channels.min(self.mc)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.mc == 0 {
            return Err(Error::invalid_config("mc must be positive"));
        }
        if self.mapping_net_dilation == 0 {
            return Err(Error::invalid_config(
                "mapping_net_dilation must be at least 1",
            ));
        }

        Ok(())
    }
}

impl Default for RestorationOptions {
    fn default() -> Self {
        Self::new()
    }
}
