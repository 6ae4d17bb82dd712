use crate::{
    batch_norm::{BatchNormConfig, batch_norm},
    error::Result,
    running_stats::RunningStats,
};
use tch::{Device, Kind, Tensor};

pub const LAYER1: &str = "layer1";
pub const LAYER2: &str = "layer2";

/// 两个隐藏层的全部可训练参数
#[derive(Debug)]
pub struct MlpParams {
    pub w1: Tensor,
    pub b1: Tensor,
    pub gamma1: Tensor,
    pub beta1: Tensor,

    pub w2: Tensor,
    pub b2: Tensor,
    pub gamma2: Tensor,
    pub beta2: Tensor,

    pub w3: Tensor,
    pub b3: Tensor,
}

impl MlpParams {
    /// 权重服从 `N(0, weight_scale^2)`，偏置和beta初始化为0，gamma初始化为1
    pub fn new(inputs: i64, hidden: i64, outputs: i64, weight_scale: f64, device: Device) -> Self {
        let weight = |rows: i64, cols: i64| {
            (Tensor::randn([rows, cols], (Kind::Float, device)) * weight_scale)
                .set_requires_grad(true)
        };
        let zeros = |len: i64| Tensor::zeros([len], (Kind::Float, device)).set_requires_grad(true);
        let ones = |len: i64| Tensor::ones([len], (Kind::Float, device)).set_requires_grad(true);

        MlpParams {
            w1: weight(inputs, hidden),
            b1: zeros(hidden),
            gamma1: ones(hidden),
            beta1: zeros(hidden),

            w2: weight(hidden, hidden),
            b2: zeros(hidden),
            gamma2: ones(hidden),
            beta2: zeros(hidden),

            w3: weight(hidden, outputs),
            b3: zeros(outputs),
        }
    }

    pub fn trainable(&self) -> [&Tensor; 10] {
        [
            &self.w1,
            &self.b1,
            &self.gamma1,
            &self.beta1,
            &self.w2,
            &self.b2,
            &self.gamma2,
            &self.beta2,
            &self.w3,
            &self.b3,
        ]
    }

    pub fn trainable_mut(&mut self) -> [&mut Tensor; 10] {
        [
            &mut self.w1,
            &mut self.b1,
            &mut self.gamma1,
            &mut self.beta1,
            &mut self.w2,
            &mut self.b2,
            &mut self.gamma2,
            &mut self.beta2,
            &mut self.w3,
            &mut self.b3,
        ]
    }
}

/// 带批量归一化的多层感知机，自己持有移动统计量
#[derive(Debug)]
pub struct Mlp {
    pub params: MlpParams,
    pub stats: RunningStats,
    pub config: BatchNormConfig,
}

impl Mlp {
    pub fn new(
        inputs: i64,
        hidden: i64,
        outputs: i64,
        weight_scale: f64,
        config: BatchNormConfig,
        device: Device,
    ) -> Self {
        Mlp {
            params: MlpParams::new(inputs, hidden, outputs, weight_scale, device),
            stats: RunningStats::new(),
            config,
        }
    }

    /// 返回未经过softmax的logits
    pub fn forward(&mut self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let p = &self.params;

        let h1 = xs.matmul(&p.w1) + &p.b1;
        let h1 = batch_norm(
            &h1,
            &p.gamma1,
            &p.beta1,
            &mut self.stats,
            LAYER1,
            self.config,
            train,
        )?
        .relu();

        let h2 = h1.matmul(&p.w2) + &p.b2;
        let h2 = batch_norm(
            &h2,
            &p.gamma2,
            &p.beta2,
            &mut self.stats,
            LAYER2,
            self.config,
            train,
        )?
        .relu();

        Ok(h2.matmul(&p.w3) + &p.b3)
    }

    /// 推理模式下最大概率的类别下标
    pub fn predict(&mut self, xs: &Tensor) -> Result<Tensor> {
        let logits = tch::no_grad(|| self.forward(xs, false))?;
        Ok(logits.argmax(-1, false))
    }
}
