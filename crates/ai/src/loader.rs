use crate::ModelLoadError;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Caption,
    Mood,
}

/// Creates model handles on demand. Implementations do the expensive work
/// (reading weights, building sessions) and are only called by [`ModelRegistry`].
#[async_trait]
pub trait ModelProvider<H>: Send + Sync + 'static {
    async fn load(&self, kind: ModelKind) -> anyhow::Result<H>;
}

type LoadFuture<H> = Shared<BoxFuture<'static, Result<Arc<H>, ModelLoadError>>>;

struct ModelSlot<H> {
    ready: OnceLock<Arc<H>>,
    loading: Mutex<Option<LoadFuture<H>>>,
}

impl<H> ModelSlot<H> {
    fn new() -> Self {
        Self {
            ready: OnceLock::new(),
            loading: Mutex::new(None),
        }
    }
}

/// Process-lifetime cache of loaded models, one slot per [`ModelKind`].
///
/// The first `acquire` of a kind starts a single load; callers arriving while
/// it is in flight await the same future and observe the same outcome. A failed
/// load is not cached, so the next `acquire` tries again. Once a handle is
/// ready it is read without taking any lock.
pub struct ModelRegistry<H> {
    provider: Arc<dyn ModelProvider<H>>,
    caption: ModelSlot<H>,
    mood: ModelSlot<H>,
}

impl<H> ModelRegistry<H>
where
    H: Send + Sync + 'static,
{
    pub fn new(provider: Arc<dyn ModelProvider<H>>) -> Self {
        Self {
            provider,
            caption: ModelSlot::new(),
            mood: ModelSlot::new(),
        }
    }

    fn slot(&self, kind: ModelKind) -> &ModelSlot<H> {
        match kind {
            ModelKind::Caption => &self.caption,
            ModelKind::Mood => &self.mood,
        }
    }

    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        self.slot(kind).ready.get().is_some()
    }

    #[tracing::instrument(name = "ModelRegistry::acquire", skip(self), fields(kind = %kind))]
    pub async fn acquire(&self, kind: ModelKind) -> Result<Arc<H>, ModelLoadError> {
        let slot = self.slot(kind);
        if let Some(handle) = slot.ready.get() {
            return Ok(handle.clone());
        }

        let load = {
            let mut loading = slot.loading.lock().await;
            if let Some(handle) = slot.ready.get() {
                return Ok(handle.clone());
            }

            match loading.as_ref() {
                Some(in_flight) => {
                    debug!("model load already in flight, waiting");
                    in_flight.clone()
                }
                None => {
                    let provider = self.provider.clone();
                    let load = async move {
                        info!("loading {} model", kind);
                        let start = std::time::Instant::now();
                        match provider.load(kind).await {
                            Ok(handle) => {
                                info!("{} model loaded in {:?}", kind, start.elapsed());
                                Ok(Arc::new(handle))
                            }
                            Err(e) => {
                                error!("failed to load {} model: {:#}", kind, e);
                                Err(ModelLoadError::new(kind, format!("{:#}", e)))
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    *loading = Some(load.clone());
                    load
                }
            }
        };

        let result = load.clone().await;

        let mut loading = slot.loading.lock().await;
        // only the caller that sees its own future still installed settles the slot
        if loading.as_ref().is_some_and(|current| current.ptr_eq(&load)) {
            if let Ok(handle) = &result {
                let _ = slot.ready.set(handle.clone());
            }
            *loading = None;
        }

        result
    }

    /// Load the given kinds up front so the first request does not pay for it.
    ///
    /// Every kind is attempted even when an earlier one fails; the first
    /// failure is returned after all attempts.
    pub async fn preload(&self, kinds: &[ModelKind]) -> Result<(), ModelLoadError> {
        let mut first_error = None;
        for kind in kinds {
            if let Err(e) = self.acquire(*kind).await {
                warn!("preload of {} model failed: {}", kind, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
