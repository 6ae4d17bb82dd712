use crate::error::{BatchNormError, Result};
use std::collections::{HashMap, hash_map::Entry};
use tch::Tensor;

/// 某一层的移动均值和移动方差
#[derive(Debug)]
pub struct LayerStats {
    pub mean: Tensor,
    pub var: Tensor,
}

impl LayerStats {
    pub fn features(&self) -> i64 {
        self.mean.size().first().copied().unwrap_or(0)
    }
}

/// 按层名保存移动统计量，只在推理模式下使用。
///
/// 由模型自己持有，不同的模型实例之间互不影响。
#[derive(Debug, Default)]
pub struct RunningStats {
    layers: HashMap<String, LayerStats>,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, layer: &str) -> Option<&LayerStats> {
        self.layers.get(layer)
    }

    pub fn contains(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }

    /// 第一次出现的层直接用当前批次的统计量初始化，
    /// 之后按 `momentum * running + (1 - momentum) * batch` 做指数加权平均。
    ///
    /// 统计量不参与反向传播。已有的层特征数不一致时返回 `FeatureMismatch`，不做修改。
    pub fn upsert(
        &mut self,
        layer: &str,
        mean: &Tensor,
        var: &Tensor,
        momentum: f64,
    ) -> Result<()> {
        let mean = mean.detach();
        let var = var.detach();

        tch::no_grad(|| match self.layers.entry(layer.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(LayerStats {
                    mean: mean.copy(),
                    var: var.copy(),
                });
                Ok(())
            }
            Entry::Occupied(mut entry) => {
                let stats = entry.get_mut();
                for got in [&mean, &var] {
                    if got.size() != stats.mean.size() {
                        return Err(BatchNormError::FeatureMismatch {
                            layer: layer.to_string(),
                            expected: stats.features(),
                            got: got.size().first().copied().unwrap_or(0),
                        });
                    }
                }

                stats.mean = &stats.mean * momentum + mean * (1. - momentum);
                stats.var = &stats.var * momentum + var * (1. - momentum);
                Ok(())
            }
        })
    }
}
