use std::{fmt, str::FromStr};

use burn::{module::Module, prelude::*};
use tracing::debug;

use crate::{
    config::RestorationOptions,
    error::Error,
    model::layers::{ActivationKind, NormKind, PaddingType, Stack, StackBuilder},
};

/// Which half (or both) of the generator a call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Encode,
    Decode,
    EncodeDecode,
}

impl FromStr for Flow {
    type Err = Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "enc" => Ok(Flow::Encode),
            "dec" => Ok(Flow::Decode),
            "enc_dec" => Ok(Flow::EncodeDecode),
            _ => Err(Error::UnsupportedFlow(s.to_string())),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Flow::Encode => "enc",
            Flow::Decode => "dec",
            Flow::EncodeDecode => "enc_dec",
        })
    }
}

/// Encoder/decoder generator whose depth and widths follow [`GlobalGeneratorConfig`].
#[derive(Module, Debug)]
pub struct GlobalGenerator<B: Backend> {
    encoder: Stack<B>,
    decoder: Stack<B>,
}
impl<B: Backend> GlobalGenerator<B> {
    pub fn encode(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.encoder.forward(input)
    }

    pub fn decode(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.decoder.forward(input)
    }

    pub fn forward(&self, input: Tensor<B, 4>, flow: Flow) -> Tensor<B, 4> {
        match flow {
            Flow::Encode => self.encode(input),
            Flow::Decode => self.decode(input),
            Flow::EncodeDecode => self.decode(self.encode(input)),
        }
    }

    /// Runs the flow named by `flow` (`enc`, `dec` or `enc_dec`, any case).
    pub fn run(
        &self,
        input: Tensor<B, 4>,
        flow: &str,
    ) -> crate::error::Result<Tensor<B, 4>> {
        Ok(self.forward(input, flow.parse()?))
    }

    pub fn encoder(&self) -> &Stack<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &Stack<B> {
        &self.decoder
    }
}

#[derive(Config, Debug)]
pub struct GlobalGeneratorConfig {
    pub input_nc: usize,
    pub output_nc: usize,
    #[config(default = 64)]
    pub ngf: usize,
    #[config(default = 3)]
    pub k_size: usize,
    #[config(default = 8)]
    pub n_downsampling: usize,
    #[config(default = "PaddingType::Reflect")]
    pub padding_type: PaddingType,
    #[config(default = "NormKind::Batch")]
    pub norm: NormKind,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
    #[config(default = "RestorationOptions::new()")]
    pub options: RestorationOptions,
}
impl GlobalGeneratorConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        self.options.validate()?;

        if self.input_nc == 0 || self.output_nc == 0 {
            return Err(Error::invalid_config("input_nc and output_nc must be positive"));
        }
        if self.ngf < 2 {
            return Err(Error::invalid_config("ngf must be at least 2"));
        }
        if !matches!(self.k_size, 3 | 4) {
            return Err(Error::invalid_config(format!(
                "k_size must be 3 or 4, got {}",
                self.k_size
            )));
        }
        if self.n_downsampling == 0 {
            return Err(Error::invalid_config("n_downsampling must be at least 1"));
        }
        if self.options.start_r >= self.n_downsampling {
            return Err(Error::invalid_config(format!(
                "start_r ({}) must be smaller than n_downsampling ({})",
                self.options.start_r, self.n_downsampling
            )));
        }
        if self.widest_channels().is_none() {
            return Err(Error::invalid_config(format!(
                "ngf ({}) doubled {} times overflows the channel count",
                self.ngf, self.n_downsampling
            )));
        }

        Ok(())
    }

    /// Number of times the encoder halves the spatial size.
    pub fn downscale_steps(&self) -> usize {
        match self.options.spatio_size {
            32 => self.n_downsampling,
            _ => self.n_downsampling - 1,
        }
    }

    /// `ngf · 2^n_downsampling`, the widest uncapped width either stack asks for.
    fn widest_channels(&self) -> Option<usize> {
        u32::try_from(self.n_downsampling)
            .ok()
            .and_then(|n| 1usize.checked_shl(n))
            .and_then(|mult| self.ngf.checked_mul(mult))
    }

    /// Width of the bottleneck the decoder consumes.
    pub fn latent_channels(&self) -> usize {
        self.options
            .feat_dim()
            .unwrap_or_else(|| self.options.cap(self.widest_channels().unwrap_or(usize::MAX)))
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> crate::error::Result<GlobalGenerator<B>> {
        self.validate()?;

        let (encoder, channels) = self.build_encoder(device);
        if channels != self.latent_channels() {
            return Err(Error::invalid_config(format!(
                "encoder produces {channels} channels but the decoder expects {}; lower mc to cap the bottleneck",
                self.latent_channels()
            )));
        }
        let decoder = self.build_decoder(device);
        debug!(
            encoder_stages = encoder.len(),
            decoder_stages = decoder.len(),
            "built generator"
        );

        Ok(GlobalGenerator { encoder, decoder })
    }

    fn builder<'a, B: Backend>(&self, channels: usize, device: &'a B::Device) -> StackBuilder<'a, B> {
        StackBuilder::new(
            channels,
            self.padding_type.clone(),
            self.norm.clone(),
            self.activation.clone(),
            device,
        )
    }

    fn build_encoder<B: Backend>(&self, device: &B::Device) -> (Stack<B>, usize) {
        let opts = &self.options;
        let (ngf, k) = (self.ngf, self.k_size);

        let mut encoder = self
            .builder::<B>(self.input_nc, device)
            .pad(3)
            .conv(opts.cap(ngf), 7, 1, 0)
            .norm_activation();

        for i in 0..opts.start_r {
            let mult = 1usize << i;
            encoder = encoder
                .conv(opts.cap(ngf * mult * 2), k, 2, 1)
                .norm_activation();
        }

        for i in opts.start_r..self.n_downsampling - 1 {
            let mult = 1usize << i;
            encoder = encoder
                .conv(opts.cap(ngf * mult * 2), k, 2, 1)
                .norm_activation()
                .resnet(1)
                .resnet(1);
        }

        let mult = 1usize << (self.n_downsampling - 1);
        encoder = match opts.spatio_size {
            32 => encoder
                .conv(opts.cap(ngf * mult * 2), k, 2, 1)
                .norm_activation(),
            64 => encoder.resnet(1),
            _ => encoder,
        };
        encoder = encoder.resnet(1);

        if let Some(feat_dim) = opts.feat_dim() {
            encoder = encoder.conv(feat_dim, 1, 1, 0);
        }

        let channels = encoder.channels();
        debug!(channels, "encoder bottleneck");
        (encoder.build(), channels)
    }

    fn build_decoder<B: Backend>(&self, device: &B::Device) -> Stack<B> {
        let opts = &self.options;
        let (ngf, k, n) = (self.ngf, self.k_size, self.n_downsampling);
        let o_pad = if k == 4 { 0 } else { 1 };
        let mult = 1usize << n;

        let mut decoder = match opts.feat_dim() {
            Some(feat_dim) => self.builder::<B>(feat_dim, device).conv(opts.cap(ngf * mult), 1, 1, 0),
            None => self.builder::<B>(opts.cap(ngf * mult), device),
        };

        decoder = decoder.resnet(1);
        decoder = match opts.spatio_size {
            32 => decoder
                .conv_transpose(opts.cap(ngf * mult / 2), k, 2, 1, o_pad)
                .norm_activation(),
            64 => decoder.resnet(1),
            _ => decoder,
        };

        for i in 1..n - opts.start_r {
            let mult = 1usize << (n - i);
            decoder = decoder
                .resnet(1)
                .resnet(1)
                .conv_transpose(opts.cap(ngf * mult / 2), k, 2, 1, o_pad)
                .norm_activation();
        }

        for i in n - opts.start_r..n {
            let mult = 1usize << (n - i);
            decoder = decoder
                .conv_transpose(ngf * mult / 2, k, 2, 1, o_pad)
                .norm_activation();
        }

        decoder = decoder.pad(3).conv(self.output_nc, 7, 1, 0);
        if !opts.use_segmentation_model {
            decoder = decoder.tanh();
        }

        decoder.build()
    }
}
