use crate::{error::Result, mlp::Mlp, sgd::sgd};
use tch::{Kind, Tensor, data::Iter2};

#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    pub batch_size: i64,
    pub learning_rate: f64,

    /// 平滑损失时当前批次所占的权重
    pub smoothing_constant: f64,

    /// 每隔多少个批次打印一次日志
    pub log_interval: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            batch_size: 64,
            learning_rate: 0.1,
            smoothing_constant: 0.01,
            log_interval: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    pub moving_loss: f64,
    pub mean_loss: f64,
    pub train_accuracy: f64,
}

/// 打乱数据后按批次训练一轮，不足一个批次的剩余数据会被丢弃。
///
/// `moving_loss` 是上一轮结束时的平滑损失，为 `None` 时用第一个批次的损失初始化。
pub fn train_epoch(
    mlp: &mut Mlp,
    images: &Tensor,
    labels: &Tensor,
    epoch: usize,
    mut moving_loss: Option<f64>,
    config: TrainConfig,
) -> Result<EpochStats> {
    let mut batches = batch_iter(images, labels, config.batch_size);
    batches.shuffle();

    let mut correct = 0; // 正确数量
    let mut total_num = 0; // 累计总样本数量
    let mut total_loss = 0.0; // 累计总损失

    for (batch_index, (xs, ys)) in batches.enumerate() {
        let output = mlp.forward(&xs, true)?;

        // 会先对数据进行softmax，再进行交叉熵计算
        let loss = output.cross_entropy_loss::<Tensor>(
            &ys,                  // 类别索引标签
            None,                 // 不设置权重
            tch::Reduction::Mean, // 损失求平均
            -100,                 // 忽略无效类别（默认）
            0.,                   // label_smoothing（默认0）
        );

        loss.backward();
        sgd(&mut mlp.params.trainable_mut(), config.learning_rate);

        let batch_loss = loss.double_value(&[]);
        let batch_size = ys.size()[0];

        moving_loss = Some(match moving_loss {
            None => batch_loss,
            Some(prev) => {
                (1. - config.smoothing_constant) * prev + config.smoothing_constant * batch_loss
            }
        });

        total_num += batch_size;
        total_loss += batch_loss * batch_size as f64;
        correct += count_correct(&output, &ys);

        if batch_index % config.log_interval.max(1) == 0 {
            tracing::debug!(
                "Epoch: {:3}  Batch_index: {:4}  Loss: {:.6} Correct: {:.3}",
                epoch,
                batch_index,
                total_loss / total_num as f64,
                correct as f64 / total_num as f64
            );
        }
    }

    let total_num = total_num.max(1) as f64;
    Ok(EpochStats {
        epoch,
        moving_loss: moving_loss.unwrap_or(0.),
        mean_loss: total_loss / total_num,
        train_accuracy: correct as f64 / total_num,
    })
}

/// 推理模式下的准确率，包括最后一个不足批次大小的批次
pub fn evaluate_accuracy(
    mlp: &mut Mlp,
    images: &Tensor,
    labels: &Tensor,
    batch_size: i64,
) -> Result<f64> {
    let mut batches = batch_iter(images, labels, batch_size);
    batches.return_smaller_last_batch();

    let mut correct = 0;
    let mut total_num = 0;

    for (xs, ys) in batches {
        let predict = mlp.predict(&xs)?;
        correct += predict
            .eq_tensor(&ys)
            .sum(Kind::Int64)
            .int64_value(&[]);
        total_num += ys.size()[0];
    }

    Ok(correct as f64 / total_num.max(1) as f64)
}

/// `Iter2` 默认把批次放到CPU上，这里保持和数据相同的设备
fn batch_iter(images: &Tensor, labels: &Tensor, batch_size: i64) -> Iter2 {
    let mut batches = Iter2::new(images, labels, batch_size);
    batches.to_device(images.device());
    batches
}

fn count_correct(output: &Tensor, labels: &Tensor) -> i64 {
    // 求出最大概率类别的下标
    output
        .argmax(-1, false)
        .eq_tensor(labels)
        .sum(Kind::Int64)
        .int64_value(&[])
}
