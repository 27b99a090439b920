use burn::{
    module::{Ignored, RunningState},
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, InstanceNorm, InstanceNormConfig, PaddingConfig2d, Tanh,
    },
    prelude::*,
    tensor::TensorData,
};

// Running averages keep 99% of the old value per batch.
const BN_MOMENTUM: f64 = 0.01;
const BN_EPSILON: f64 = 1e-3;

#[derive(Config, Debug, PartialEq)]
pub enum PaddingType {
    Reflect,
    Replicate,
    Zero,
}

#[derive(Config, Debug, PartialEq)]
pub enum NormKind {
    Batch,
    /// Instance normalization without affine parameters.
    Instance,
}

impl NormKind {
    pub fn init<B: Backend>(&self, channels: usize, device: &B::Device) -> Norm<B> {
        match self {
            NormKind::Batch => Norm::Batch(
                BatchNormConfig::new(channels)
                    .with_momentum(BN_MOMENTUM)
                    .with_epsilon(BN_EPSILON)
                    .init(device),
            ),
            NormKind::Instance => Norm::Instance(
                InstanceNormConfig::new(channels)
                    .with_affine(false)
                    .init(device),
            ),
        }
    }
}

#[derive(Config, Debug, PartialEq)]
pub enum ActivationKind {
    Relu,
    /// LeakyReLU with a 0.2 negative slope.
    LeakyRelu,
}

// Parameter free, so modules hold it as `Ignored<ActivationKind>`.
impl ActivationKind {
    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            ActivationKind::Relu => burn::tensor::activation::relu(input),
            ActivationKind::LeakyRelu => burn::tensor::activation::leaky_relu(input, 0.2),
        }
    }
}

#[derive(Module, Debug)]
pub enum Norm<B: Backend> {
    Batch(BatchNorm<B, 2>),
    Instance(InstanceNorm<B>),
}
impl<B: Backend> Norm<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Norm::Batch(bn) => bn.forward(input),
            Norm::Instance(norm) => norm.forward(input),
        }
    }
}

/// Pads height and width by the same amount on every side.
#[derive(Module, Debug, Clone)]
pub struct Pad2d {
    amount: usize,
    mode: Ignored<PaddingType>,
}
impl Pad2d {
    pub fn new(amount: usize, mode: PaddingType) -> Self {
        Self {
            amount,
            mode: Ignored(mode),
        }
    }

    pub fn amount(&self) -> usize {
        self.amount
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.amount == 0 {
            return input;
        }

        let amount = self.amount;
        if *self.mode == PaddingType::Zero {
            return input.pad((amount, amount, amount, amount), 0.0);
        }

        let [_, _, height, width] = input.dims();
        let device = input.device();
        let rows = self.indices::<B>(height, &device);
        let cols = self.indices::<B>(width, &device);

        input.select(2, rows).select(3, cols)
    }

    /// Source index for every position of the padded axis.
    fn indices<B: Backend>(&self, len: usize, device: &B::Device) -> Tensor<B, 1, Int> {
        if *self.mode == PaddingType::Reflect {
            assert!(
                self.amount < len,
                "reflection padding of {} needs a dimension larger than {len}",
                self.amount
            );
        }

        let amount = self.amount as i64;
        let last = len as i64 - 1;
        let indices = (-amount..=last + amount)
            .map(|i| match *self.mode {
                PaddingType::Reflect if i < 0 => -i,
                PaddingType::Reflect if i > last => 2 * last - i,
                _ => i.clamp(0, last),
            })
            .collect::<Vec<_>>();
        let size = indices.len();

        Tensor::from_data(TensorData::new(indices, [size]), device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    Nearest,
    Bilinear,
}

/// Resizes the spatial dimensions of `input` to `size`, sampling at
/// half-pixel centers (`tf.image.resize`, `align_corners=False`).
///
/// Bilinear sampling clamps source coordinates to the edge pixels; nearest
/// sampling picks the pixel whose area contains the output center.
pub fn resize<B: Backend>(
    input: Tensor<B, 4>,
    size: [usize; 2],
    mode: ResizeMode,
) -> Tensor<B, 4> {
    let [_, _, height, width] = input.dims();
    let input = resize_axis(input, 2, height, size[0], mode);

    resize_axis(input, 3, width, size[1], mode)
}

fn resize_axis<B: Backend>(
    input: Tensor<B, 4>,
    dim: usize,
    len: usize,
    target: usize,
    mode: ResizeMode,
) -> Tensor<B, 4> {
    if len == target {
        return input;
    }

    let device = input.device();
    let scale = len as f64 / target as f64;
    let last = len as i64 - 1;
    let index = |indices: Vec<i64>| {
        Tensor::<B, 1, Int>::from_data(TensorData::new(indices, [target]), &device)
    };

    match mode {
        ResizeMode::Nearest => {
            let indices = (0..target)
                .map(|o| (((o as f64 + 0.5) * scale).floor() as i64).min(last))
                .collect();
            input.select(dim, index(indices))
        }
        ResizeMode::Bilinear => {
            let mut lower = Vec::with_capacity(target);
            let mut upper = Vec::with_capacity(target);
            let mut weights = Vec::with_capacity(target);
            for o in 0..target {
                let source = ((o as f64 + 0.5) * scale - 0.5).max(0.0);
                let floor = (source.floor() as i64).min(last);
                lower.push(floor);
                upper.push((floor + 1).min(last));
                weights.push((source - floor as f64) as f32);
            }

            let mut shape = [1; 4];
            shape[dim] = target;
            let weights = Tensor::<B, 1>::from_data(TensorData::new(weights, [target]), &device)
                .reshape(shape);
            let low = input.clone().select(dim, index(lower));
            let high = input.select(dim, index(upper));

            low.clone().add(high.sub(low).mul(weights))
        }
    }
}

#[derive(Config, Debug)]
pub struct ParamFreeBatchNormConfig {
    pub num_features: usize,
    #[config(default = 0.01)]
    pub momentum: f64,
    #[config(default = 1e-3)]
    pub epsilon: f64,
}
impl ParamFreeBatchNormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ParamFreeBatchNorm<B> {
        ParamFreeBatchNorm {
            running_mean: RunningState::new(Tensor::zeros([self.num_features], device)),
            running_var: RunningState::new(Tensor::ones([self.num_features], device)),
            momentum: self.momentum,
            epsilon: self.epsilon,
        }
    }
}

/// Batch normalization with neither learned scale nor shift.
///
/// Normalizes with the current batch statistics when the backend records
/// gradients, otherwise with the running averages.
#[derive(Module, Debug)]
pub struct ParamFreeBatchNorm<B: Backend> {
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}
impl<B: Backend> ParamFreeBatchNorm<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match B::ad_enabled() {
            true => self.forward_train(input),
            false => self.forward_inference(input),
        }
    }

    fn forward_inference(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let channels = input.dims()[1];
        let mean = self.running_mean.value().reshape([1, channels, 1, 1]);
        let var = self.running_var.value().reshape([1, channels, 1, 1]);

        self.normalize(input, mean, var)
    }

    fn forward_train(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, channels, height, width] = input.dims();

        // [B, C, H, W] -> [C, B*H*W]
        let flat = input
            .clone()
            .swap_dims(0, 1)
            .reshape([channels, batch_size * height * width]);
        let mean = flat.clone().mean_dim(1);
        let var = flat.sub(mean.clone()).powf_scalar(2.0).mean_dim(1);

        let mean = mean.reshape([channels]);
        let var = var.reshape([channels]);

        let running_mean = self
            .running_mean
            .value_sync()
            .mul_scalar(1.0 - self.momentum)
            .add(mean.clone().detach().mul_scalar(self.momentum));
        let running_var = self
            .running_var
            .value_sync()
            .mul_scalar(1.0 - self.momentum)
            .add(var.clone().detach().mul_scalar(self.momentum));
        self.running_mean.update(running_mean.detach());
        self.running_var.update(running_var.detach());

        self.normalize(
            input,
            mean.reshape([1, channels, 1, 1]),
            var.reshape([1, channels, 1, 1]),
        )
    }

    fn normalize(&self, input: Tensor<B, 4>, mean: Tensor<B, 4>, var: Tensor<B, 4>) -> Tensor<B, 4> {
        input.sub(mean).div(var.add_scalar(self.epsilon).sqrt())
    }
}

#[derive(Config, Debug)]
pub struct ResnetBlockConfig {
    pub dim: usize,
    #[config(default = "PaddingType::Reflect")]
    pub padding_type: PaddingType,
    #[config(default = "NormKind::Batch")]
    pub norm: NormKind,
    #[config(default = "ActivationKind::Relu")]
    pub activation: ActivationKind,
    #[config(default = 1)]
    pub dilation: usize,
}
impl ResnetBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResnetBlock<B> {
        let conv1 = Conv2dConfig::new([self.dim, self.dim], [3, 3])
            .with_dilation([self.dilation, self.dilation])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let conv2 = Conv2dConfig::new([self.dim, self.dim], [3, 3])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        ResnetBlock {
            pad1: Pad2d::new(self.dilation, self.padding_type.clone()),
            conv1,
            norm1: self.norm.init(self.dim, device),
            act: Ignored(self.activation.clone()),
            pad2: Pad2d::new(1, self.padding_type.clone()),
            conv2,
            norm2: self.norm.init(self.dim, device),
        }
    }
}

/// `x + F(x)` where `F` is two padded 3x3 convolutions; the first may be dilated.
#[derive(Module, Debug)]
pub struct ResnetBlock<B: Backend> {
    pad1: Pad2d,
    conv1: Conv2d<B>,
    norm1: Norm<B>,
    act: Ignored<ActivationKind>,
    pad2: Pad2d,
    conv2: Conv2d<B>,
    norm2: Norm<B>,
}
impl<B: Backend> ResnetBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.pad1.forward(input.clone());
        let output = self.conv1.forward(output);
        let output = self.norm1.forward(output);
        let output = self.act.forward(output);
        let output = self.pad2.forward(output);
        let output = self.conv2.forward(output);
        let output = self.norm2.forward(output);

        input.add(output)
    }

    pub fn channels(&self) -> usize {
        self.conv1.weight.val().dims()[0]
    }

    pub fn dilation(&self) -> usize {
        self.pad1.amount()
    }
}

/// One entry of a sequential stack.
#[derive(Module, Debug)]
pub enum Stage<B: Backend> {
    Pad(Pad2d),
    Conv(Conv2d<B>),
    ConvTranspose(ConvTranspose2d<B>),
    Norm(Norm<B>),
    Activation(Ignored<ActivationKind>),
    Resnet(ResnetBlock<B>),
    Tanh(Tanh),
}
impl<B: Backend> Stage<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Stage::Pad(pad) => pad.forward(input),
            Stage::Conv(conv) => conv.forward(input),
            Stage::ConvTranspose(conv) => conv.forward(input),
            Stage::Norm(norm) => norm.forward(input),
            Stage::Activation(act) => act.forward(input),
            Stage::Resnet(block) => block.forward(input),
            Stage::Tanh(tanh) => tanh.forward(input),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Stage::Pad(pad) => format!("pad({})", pad.amount()),
            Stage::Conv(conv) => {
                let [out_c, in_c, k, _] = conv.weight.val().dims();
                format!("conv{k}x{k}({in_c} -> {out_c})")
            }
            Stage::ConvTranspose(conv) => {
                let [in_c, out_c, k, _] = conv.weight.val().dims();
                format!("deconv{k}x{k}({in_c} -> {out_c})")
            }
            Stage::Norm(Norm::Batch(_)) => "batch_norm".to_string(),
            Stage::Norm(Norm::Instance(_)) => "instance_norm".to_string(),
            Stage::Activation(act) => match act.0 {
                ActivationKind::Relu => "relu".to_string(),
                ActivationKind::LeakyRelu => "leaky_relu".to_string(),
            },
            Stage::Resnet(block) => format!(
                "resnet({}, dilation {})",
                block.channels(),
                block.dilation()
            ),
            Stage::Tanh(_) => "tanh".to_string(),
        }
    }
}

/// An ordered stack of stages applied one after another.
#[derive(Module, Debug)]
pub struct Stack<B: Backend> {
    stages: Vec<Stage<B>>,
}
impl<B: Backend> Stack<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.stages
            .iter()
            .fold(input, |output, stage| stage.forward(output))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn describe(&self) -> Vec<String> {
        self.stages.iter().map(Stage::describe).collect()
    }
}

/// Appends stages while tracking the channel width flowing out of the stack.
pub struct StackBuilder<'a, B: Backend> {
    stages: Vec<Stage<B>>,
    channels: usize,
    padding_type: PaddingType,
    norm: NormKind,
    activation: ActivationKind,
    device: &'a B::Device,
}
impl<'a, B: Backend> StackBuilder<'a, B> {
    pub fn new(
        channels: usize,
        padding_type: PaddingType,
        norm: NormKind,
        activation: ActivationKind,
        device: &'a B::Device,
    ) -> Self {
        Self {
            stages: Vec::new(),
            channels,
            padding_type,
            norm,
            activation,
            device,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pad(mut self, amount: usize) -> Self {
        self.stages
            .push(Stage::Pad(Pad2d::new(amount, self.padding_type.clone())));
        self
    }

    pub fn conv(mut self, channels: usize, kernel: usize, stride: usize, padding: usize) -> Self {
        let conv = Conv2dConfig::new([self.channels, channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(self.device);
        self.stages.push(Stage::Conv(conv));
        self.channels = channels;
        self
    }

    pub fn conv_transpose(
        mut self,
        channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        padding_out: usize,
    ) -> Self {
        let conv = ConvTranspose2dConfig::new([self.channels, channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding([padding, padding])
            .with_padding_out([padding_out, padding_out])
            .init(self.device);
        self.stages.push(Stage::ConvTranspose(conv));
        self.channels = channels;
        self
    }

    pub fn norm(mut self) -> Self {
        self.stages
            .push(Stage::Norm(self.norm.init(self.channels, self.device)));
        self
    }

    pub fn activation(mut self) -> Self {
        self.stages
            .push(Stage::Activation(Ignored(self.activation.clone())));
        self
    }

    pub fn norm_activation(self) -> Self {
        self.norm().activation()
    }

    pub fn resnet(mut self, dilation: usize) -> Self {
        let block = ResnetBlockConfig::new(self.channels)
            .with_padding_type(self.padding_type.clone())
            .with_norm(self.norm.clone())
            .with_activation(self.activation.clone())
            .with_dilation(dilation)
            .init(self.device);
        self.stages.push(Stage::Resnet(block));
        self
    }

    pub fn tanh(mut self) -> Self {
        self.stages.push(Stage::Tanh(Tanh::new()));
        self
    }

    pub fn build(self) -> Stack<B> {
        Stack {
            stages: self.stages,
        }
    }
}
