use crate::DiaryEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoTag {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
}

/// Flat record handed to persistence after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDiaryRecord {
    pub image_file: Option<String>,
    pub refined_caption: String,
    pub blip_caption: String,
    pub keywords: Vec<String>,
    pub user_context: Option<String>,
    pub mood_text: Option<String>,
    #[serde(flatten)]
    pub geo: GeoTag,
}

impl NewDiaryRecord {
    pub fn from_entry(
        entry: &DiaryEntry,
        user_context: Option<&str>,
        image_file: Option<&str>,
        geo: GeoTag,
    ) -> Self {
        let result = entry.outcome.result();
        Self {
            image_file: image_file.map(|v| v.to_string()),
            refined_caption: result.refined_caption.clone(),
            blip_caption: entry.analysis.caption.clone(),
            keywords: result.keywords.clone(),
            user_context: user_context.map(|v| v.to_string()),
            mood_text: entry.analysis.mood_text(),
            geo,
        }
    }

    /// Keywords in the comma joined column format.
    pub fn keywords_joined(&self) -> String {
        self.keywords.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryRecord {
    pub id: u64,
    #[serde(flatten)]
    pub data: NewDiaryRecord,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DiaryStore: Send + Sync {
    async fn insert(&self, record: NewDiaryRecord) -> anyhow::Result<DiaryRecord>;
    async fn get(&self, id: u64) -> anyhow::Result<Option<DiaryRecord>>;
    /// Most recent first.
    async fn list(&self) -> anyhow::Result<Vec<DiaryRecord>>;
}
