use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::GenericImageView;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

/// 处理器执行失败
///
/// 驱动Worker的重试与死信逻辑，不跨越存储层边界。
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("无效的任务参数: {0}")]
    InvalidPayload(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// 任务处理器接口
///
/// 每种任务类型一个实现，处理器是无状态的纯函数：输入payload，
/// 返回结果或失败。抛出的任何失败都会触发Worker的重试判定。
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 执行任务，返回写入任务记录的结果
    async fn run(&self, payload: &serde_json::Value) -> Result<serde_json::Value, HandlerError>;

    /// 处理器对应的任务类型标识
    fn job_type(&self) -> &str;
}

/// 任务处理器注册表
///
/// 进程级的 job_type 到处理器映射，Worker启动时初始化。
/// 新增任务类型只需实现 [`JobHandler`] 并注册一次。
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置处理器
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SleepHandler));
        registry.register(Arc::new(WordCountHandler));
        registry.register(Arc::new(ThumbnailHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        info!("注册任务处理器: {}", job_type);
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn supported_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

/// 模拟负载处理器
///
/// 时长与失败概率都由payload控制，便于演示完整的重试与死信链路：
///
/// - `{"duration": 3.0}` 睡眠3秒后成功
/// - `{"duration": 0.1, "fail_probability": 1.0}` 立即失败
pub struct SleepHandler;

#[derive(Debug, Deserialize)]
struct SleepParams {
    #[serde(default = "default_sleep_duration")]
    duration: f64,
    #[serde(default)]
    fail_probability: f64,
}

fn default_sleep_duration() -> f64 {
    1.0
}

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, payload: &serde_json::Value) -> Result<serde_json::Value, HandlerError> {
        let params: SleepParams = serde_json::from_value(payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(format!("解析sleep参数失败: {e}")))?;

        if !params.duration.is_finite() || params.duration < 0.0 {
            return Err(HandlerError::InvalidPayload(format!(
                "duration 必须为非负有限值: {}",
                params.duration
            )));
        }

        // 先判定模拟失败再睡眠, 失败路径不浪费等待时间
        if rand::random::<f64>() < params.fail_probability {
            return Err(HandlerError::Failed(format!(
                "模拟失败 (fail_probability={})",
                params.fail_probability
            )));
        }

        tokio::time::sleep(Duration::from_secs_f64(params.duration)).await;

        Ok(json!({
            "slept_for": params.duration,
            "message": format!("Completed sleep of {}s", params.duration),
        }))
    }

    fn job_type(&self) -> &str {
        "sleep"
    }
}

/// 文本统计处理器，统计文件的词数、行数与字符数
pub struct WordCountHandler;

#[derive(Debug, Deserialize)]
struct WordCountParams {
    file_path: String,
}

#[async_trait]
impl JobHandler for WordCountHandler {
    async fn run(&self, payload: &serde_json::Value) -> Result<serde_json::Value, HandlerError> {
        let params: WordCountParams = serde_json::from_value(payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(format!("解析word_count参数失败: {e}")))?;

        let content = tokio::fs::read_to_string(&params.file_path).await?;

        let word_count = content.split_whitespace().count();
        let line_count = content.lines().count();
        let char_count = content.chars().count();

        Ok(json!({
            "file_path": params.file_path,
            "word_count": word_count,
            "line_count": line_count,
            "char_count": char_count,
        }))
    }

    fn job_type(&self) -> &str {
        "word_count"
    }
}

/// 缩略图处理器，等比缩放图片
pub struct ThumbnailHandler;

#[derive(Debug, Deserialize)]
struct ThumbnailParams {
    input_path: String,
    output_path: Option<String>,
    #[serde(default = "default_thumbnail_dim")]
    width: u32,
    #[serde(default = "default_thumbnail_dim")]
    height: u32,
}

fn default_thumbnail_dim() -> u32 {
    128
}

/// 未指定输出路径时从输入路径派生: sample.jpg -> sample_thumb.jpg
fn derive_output_path(input_path: &str) -> String {
    let path = Path::new(input_path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "thumbnail".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    match path.parent() {
        Some(parent) if parent != Path::new("") => parent
            .join(format!("{stem}_thumb{ext}"))
            .to_string_lossy()
            .to_string(),
        _ => format!("{stem}_thumb{ext}"),
    }
}

#[async_trait]
impl JobHandler for ThumbnailHandler {
    async fn run(&self, payload: &serde_json::Value) -> Result<serde_json::Value, HandlerError> {
        let params: ThumbnailParams = serde_json::from_value(payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(format!("解析thumbnail参数失败: {e}")))?;

        if params.width == 0 || params.height == 0 {
            return Err(HandlerError::InvalidPayload(
                "缩略图尺寸必须大于 0".to_string(),
            ));
        }

        let output_path = params
            .output_path
            .clone()
            .unwrap_or_else(|| derive_output_path(&params.input_path));

        // 图像解码与缩放是同步的CPU密集操作, 移交阻塞线程池
        let input_path = params.input_path.clone();
        let target = (params.width, params.height);
        let saved_to = output_path.clone();
        let (original_size, thumbnail_size) = tokio::task::spawn_blocking(move || {
            let img = image::open(&input_path)
                .map_err(|e| HandlerError::Failed(format!("打开图片 {input_path} 失败: {e}")))?;
            let original_size = (img.width(), img.height());

            // thumbnail 保持纵横比, 结果不会超出目标尺寸
            let thumb = img.thumbnail(target.0, target.1);
            let thumbnail_size = (thumb.width(), thumb.height());

            thumb
                .save(&saved_to)
                .map_err(|e| HandlerError::Failed(format!("保存缩略图 {saved_to} 失败: {e}")))?;

            Ok::<_, HandlerError>((original_size, thumbnail_size))
        })
        .await
        .map_err(|e| HandlerError::Failed(format!("缩略图任务执行线程失败: {e}")))??;

        Ok(json!({
            "input_path": params.input_path,
            "output_path": output_path,
            "original_size": [original_size.0, original_size.1],
            "thumbnail_size": [thumbnail_size.0, thumbnail_size.1],
        }))
    }

    fn job_type(&self) -> &str {
        "thumbnail"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_registry_defaults() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.get("sleep").is_some());
        assert!(registry.get("word_count").is_some());
        assert!(registry.get("thumbnail").is_some());
        assert!(registry.get("no_such_type").is_none());
    }

    #[tokio::test]
    async fn test_sleep_success() {
        let result = SleepHandler
            .run(&json!({"duration": 0.01}))
            .await
            .unwrap();
        assert_eq!(result["slept_for"], json!(0.01));
    }

    #[tokio::test]
    async fn test_sleep_always_fails_with_probability_one() {
        let err = SleepHandler
            .run(&json!({"duration": 0.01, "fail_probability": 1.0}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("模拟失败"));
    }

    #[tokio::test]
    async fn test_sleep_rejects_negative_duration() {
        let err = SleepHandler
            .run(&json!({"duration": -1.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_word_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello world\nfoo bar baz\n").unwrap();

        let result = WordCountHandler
            .run(&json!({"file_path": file.path().to_string_lossy()}))
            .await
            .unwrap();

        assert_eq!(result["word_count"], json!(5));
        assert_eq!(result["line_count"], json!(2));
        assert_eq!(result["char_count"], json!(24));
    }

    #[tokio::test]
    async fn test_word_count_missing_file() {
        let err = WordCountHandler
            .run(&json!({"file_path": "/no/such/file.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Io(_)));
    }

    #[tokio::test]
    async fn test_word_count_missing_path_param() {
        let err = WordCountHandler.run(&json!({})).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_thumbnail_preserves_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sample.png");
        let output = dir.path().join("sample_small.png");
        image::RgbaImage::new(64, 32)
            .save(&input)
            .unwrap();

        let result = ThumbnailHandler
            .run(&json!({
                "input_path": input.to_string_lossy(),
                "output_path": output.to_string_lossy(),
                "width": 16,
                "height": 16,
            }))
            .await
            .unwrap();

        assert_eq!(result["original_size"], json!([64, 32]));
        // 64x32 缩到 16x16 目标框内, 等比结果为 16x8
        assert_eq!(result["thumbnail_size"], json!([16, 8]));
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_thumbnail_missing_input() {
        let err = ThumbnailHandler
            .run(&json!({"input_path": "/no/such/image.png"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));
    }

    #[test]
    fn test_derive_output_path() {
        assert_eq!(derive_output_path("/data/sample.jpg"), "/data/sample_thumb.jpg");
        assert_eq!(derive_output_path("image.png"), "image_thumb.png");
    }
}
