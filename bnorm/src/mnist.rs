use crate::error::{BatchNormError, Result};
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue, USER_AGENT};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use tch::Tensor;
use tokio_stream::StreamExt;

const MNIST_URL: &str = "https://ossci-datasets.s3.amazonaws.com/mnist";
const MNIST_DIR: &str = "data/mnist";

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte.gz";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte.gz";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte.gz";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte.gz";

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

pub const IMAGE_SIZE: i64 = 28; // 图片大小
pub const NUM_CLASSES: i64 = 10;

#[derive(Debug)]
pub struct MnistDataset {
    pub dir: String,
    pub url: String,

    /// `[n, 784]`，像素值归一化到 `[0, 1]`
    pub train_images: Tensor,
    pub train_labels: Tensor,
    pub test_images: Tensor,
    pub test_labels: Tensor,
}

impl MnistDataset {
    pub async fn new(data_url: Option<&str>, save_dir: Option<&str>) -> Result<MnistDataset> {
        let url = data_url.unwrap_or(MNIST_URL);
        let dir = save_dir.unwrap_or(MNIST_DIR);

        let mnist_dir = Path::new(dir);
        if !mnist_dir.exists() {
            fs::create_dir_all(mnist_dir)?;
        }

        for name in [TRAIN_IMAGES, TRAIN_LABELS, TEST_IMAGES, TEST_LABELS] {
            let path = mnist_dir.join(name);
            if !path.exists() {
                Self::download_file(&format!("{url}/{name}"), &path).await?;
            }
        }

        let train_images = Self::decode_images(&Self::read_gz(&mnist_dir.join(TRAIN_IMAGES))?)?;
        let train_labels = Self::decode_labels(&Self::read_gz(&mnist_dir.join(TRAIN_LABELS))?)?;
        let test_images = Self::decode_images(&Self::read_gz(&mnist_dir.join(TEST_IMAGES))?)?;
        let test_labels = Self::decode_labels(&Self::read_gz(&mnist_dir.join(TEST_LABELS))?)?;

        tracing::info!(
            "Loaded MNIST: {} train, {} test",
            train_labels.size()[0],
            test_labels.size()[0]
        );

        Ok(MnistDataset {
            url: url.to_string(),
            dir: dir.to_string(),

            train_images,
            train_labels,
            test_images,
            test_labels,
        })
    }

    async fn download_file(url: &str, path: &Path) -> Result<()> {
        tracing::info!("Downloading {} to {}", url, path.display());

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::new();
        let mut response_stream = client
            .get(url)
            .headers(headers)
            .send()
            .await?
            .error_for_status()?
            .bytes_stream();

        // 先写入临时文件，下载完成后再重命名，避免留下不完整的文件
        let part_path = path.with_extension("part");
        let mut total_bytes = 0;
        let mut file = File::create(&part_path)?;

        while let Some(chunk_result) = response_stream.next().await {
            let chunk = chunk_result?;

            total_bytes += chunk.len();
            tracing::debug!("Downloaded {total_bytes} bytes");

            file.write_all(&chunk)?;
        }

        fs::rename(&part_path, path)?;
        Ok(())
    }

    fn read_gz(path: &Path) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        GzDecoder::new(File::open(path)?).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// 解析idx3格式的图片文件: magic, 数量, 行数, 列数, 之后是逐像素的字节
    pub fn decode_images(buffer: &[u8]) -> Result<Tensor> {
        check_magic(buffer, IMAGE_MAGIC)?;
        let num_images = read_u32(buffer, 4)? as usize;
        let rows = read_u32(buffer, 8)? as usize;
        let cols = read_u32(buffer, 12)? as usize;

        // 头部数值不可信，相乘时可能溢出
        let expected = num_images
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(cols))
            .ok_or_else(|| {
                BatchNormError::InvalidIdx(format!(
                    "image size {num_images}x{rows}x{cols} overflows"
                ))
            })?;

        let pixels = &buffer[16..];
        if pixels.len() != expected {
            return Err(BatchNormError::InvalidIdx(format!(
                "expected {} pixels, found {}",
                expected,
                pixels.len()
            )));
        }

        let images = pixels
            .iter()
            .map(|&p| p as f32 / 255.0) // Normalize to [0, 1]
            .collect::<Vec<_>>();

        Ok(Tensor::from_slice(&images).reshape([num_images as i64, (rows * cols) as i64]))
    }

    /// 解析idx1格式的标签文件: magic, 数量, 之后每个字节是一个标签
    pub fn decode_labels(buffer: &[u8]) -> Result<Tensor> {
        check_magic(buffer, LABEL_MAGIC)?;
        let num_labels = read_u32(buffer, 4)? as usize;

        let data = &buffer[8..];
        if data.len() != num_labels {
            return Err(BatchNormError::InvalidIdx(format!(
                "expected {} labels, found {}",
                num_labels,
                data.len()
            )));
        }

        let labels = data.iter().map(|&l| l as i64).collect::<Vec<_>>();
        Ok(Tensor::from_slice(&labels))
    }
}

fn read_u32(buffer: &[u8], offset: usize) -> Result<u32> {
    buffer
        .get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| BatchNormError::InvalidIdx(format!("truncated header at byte {offset}")))
}

fn check_magic(buffer: &[u8], expected: u32) -> Result<()> {
    let magic = read_u32(buffer, 0)?;
    if magic != expected {
        return Err(BatchNormError::InvalidIdx(format!(
            "magic number {magic}, expected {expected}"
        )));
    }

    // 图片头部16字节，标签头部8字节
    let header = if expected == IMAGE_MAGIC { 16 } else { 8 };
    if buffer.len() < header {
        return Err(BatchNormError::InvalidIdx(format!(
            "header needs {header} bytes, found {}",
            buffer.len()
        )));
    }

    Ok(())
}
