//! 上传事件类型定义
//!
//! 管理器在每次状态变化落地后广播，供界面层实时展示

use crate::error::UploadErrorKind;
use serde::{Deserialize, Serialize};

/// 上传任务事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 文件被接受进入批次
    Created {
        task_id: String,
        file_name: String,
        total_size: u64,
    },
    /// 进度更新
    Progress {
        task_id: String,
        attempt: u32,
        uploaded_size: u64,
        total_size: u64,
        progress: u8,
    },
    /// 状态变更
    StatusChanged {
        task_id: String,
        old_status: String,
        new_status: String,
    },
    /// 上传成功
    Completed {
        task_id: String,
        completed_at: i64,
        attempts: u32,
    },
    /// 上传失败
    Failed {
        task_id: String,
        error: String,
        error_kind: UploadErrorKind,
    },
    /// 被软删除
    Removed { task_id: String },
}

impl UploadEvent {
    /// 获取任务 ID
    pub fn task_id(&self) -> &str {
        match self {
            UploadEvent::Created { task_id, .. } => task_id,
            UploadEvent::Progress { task_id, .. } => task_id,
            UploadEvent::StatusChanged { task_id, .. } => task_id,
            UploadEvent::Completed { task_id, .. } => task_id,
            UploadEvent::Failed { task_id, .. } => task_id,
            UploadEvent::Removed { task_id } => task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = UploadEvent::Progress {
            task_id: "t1".to_string(),
            attempt: 1,
            uploaded_size: 50,
            total_size: 100,
            progress: 50,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "progress");
        assert_eq!(json["progress"], 50);

        let back: UploadEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.task_id(), "t1");
    }

    #[test]
    fn test_failed_event_kind() {
        let event = UploadEvent::Failed {
            task_id: "t2".to_string(),
            error: "boom".to_string(),
            error_kind: UploadErrorKind::DisallowedFileType,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["error_kind"], "disallowed_file_type");
        assert_eq!(event.task_id(), "t2");
    }
}
