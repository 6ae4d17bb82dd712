use bnorm::EpochStats;
use plotters::prelude::*;
use std::path::Path;

/// 绘制每个epoch的平滑损失、训练准确率和测试准确率
pub fn training_curves(
    path: &Path,
    history: &[(EpochStats, f64)],
) -> Result<(), Box<dyn std::error::Error>> {
    let epochs = history.len().max(1) as f64;
    let max_loss = history
        .iter()
        .map(|(stats, _)| stats.moving_loss)
        .fold(1.0_f64, f64::max);

    // 创建图像文件
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    // 设置图表
    let mut chart = ChartBuilder::on(&root)
        .caption("Batch Norm MLP on MNIST", ("sans-serif", 40))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(1.0..epochs.max(2.0), 0.0..max_loss)?;

    // 配置网格和坐标轴
    chart.configure_mesh().x_desc("Epoch").y_desc("Value").draw()?;

    chart
        .draw_series(LineSeries::new(
            history
                .iter()
                .map(|(stats, _)| (stats.epoch as f64, stats.moving_loss)),
            &RED,
        ))?
        .label("Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    chart
        .draw_series(LineSeries::new(
            history
                .iter()
                .map(|(stats, _)| (stats.epoch as f64, stats.train_accuracy)),
            &BLUE,
        ))?
        .label("Train accuracy")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    chart
        .draw_series(LineSeries::new(
            history
                .iter()
                .map(|(stats, test_acc)| (stats.epoch as f64, *test_acc)),
            &GREEN,
        ))?
        .label("Test accuracy")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &GREEN));

    // 添加图例
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;

    Ok(())
}
