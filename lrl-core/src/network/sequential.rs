use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, linear};
use either::Either;

#[derive(Debug, Clone)]
pub struct LinearLayer {
    layer: Linear,
}

impl LinearLayer {
    pub fn new(in_dim: usize, out_dim: usize, vb: &VarBuilder, name: &str) -> Result<Self> {
        let layer = linear(in_dim, out_dim, vb.pp(name))?;
        Ok(Self { layer })
    }
}

impl Module for LinearLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.layer.forward(xs)
    }
}

#[derive(Debug, Clone)]
pub struct ActivationLayer(pub Activation);

impl Module for ActivationLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.0.forward(xs)
    }
}

#[derive(Debug, Clone)]
pub struct Layer(pub Either<LinearLayer, ActivationLayer>);

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match &self.0 {
            Either::Left(linear) => linear.forward(xs),
            Either::Right(activation) => activation.forward(xs),
        }
    }
}

/// Linear layers with ReLU in between, no activation after the last layer. `Send + Clone`
/// unlike `candle_nn::Sequential`.
#[derive(Default, Debug, Clone)]
pub struct Mlp {
    layers: Vec<Layer>,
}

impl Mlp {
    pub fn add_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in self.layers.iter() {
            xs = layer.forward(&xs)?
        }
        Ok(xs)
    }
}

pub fn build_sequential(
    input_dim: usize,
    layers: &[usize],
    vb: &VarBuilder,
    prefix: &str,
) -> Result<Mlp> {
    let mut last_dim = input_dim;
    let mut nn = Mlp::default();
    let num_layers = layers.len();
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let linear = LinearLayer::new(last_dim, *layer_size, vb, &format!("{prefix}{layer_idx}"))?;
        nn = nn.add_layer(Layer(Either::Left(linear)));
        if layer_idx != num_layers - 1 {
            nn = nn.add_layer(Layer(Either::Right(ActivationLayer(Activation::Relu))));
        }
        last_dim = *layer_size;
    }
    Ok(nn)
}
