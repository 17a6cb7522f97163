use async_trait::async_trait;
use chrono::Utc;
use diary_pipeline::{DiaryRecord, DiaryStore, NewDiaryRecord};
use tokio::sync::RwLock;

/// Process-local store. Records are lost on restart.
#[derive(Default)]
pub struct MemoryDiaryStore {
    records: RwLock<Vec<DiaryRecord>>,
}

impl MemoryDiaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiaryStore for MemoryDiaryStore {
    async fn insert(&self, record: NewDiaryRecord) -> anyhow::Result<DiaryRecord> {
        let mut records = self.records.write().await;
        let id = records.last().map(|r| r.id + 1).unwrap_or(1);
        let record = DiaryRecord {
            id,
            data: record,
            created_at: Utc::now(),
        };
        records.push(record.clone());
        tracing::debug!("diary record {} stored", id);
        Ok(record)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<DiaryRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<DiaryRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().rev().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diary_pipeline::GeoTag;

    fn record(caption: &str) -> NewDiaryRecord {
        NewDiaryRecord {
            image_file: None,
            refined_caption: caption.into(),
            blip_caption: "a dog".into(),
            keywords: vec!["개".into(), "공원".into()],
            user_context: None,
            mood_text: None,
            geo: GeoTag::default(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn assigns_increasing_ids_and_lists_newest_first() {
        let store = MemoryDiaryStore::new();
        let first = store.insert(record("one")).await.unwrap();
        let second = store.insert(record("two")).await.unwrap();

        assert_eq!((first.id, second.id), (1, 2));
        assert!(second.created_at >= first.created_at);
        assert_eq!(
            store.get(2).await.unwrap().unwrap().data.refined_caption,
            "two"
        );
        assert!(store.get(3).await.unwrap().is_none());

        let ids: Vec<u64> = store.list().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
