use crate::config::CameraEntry;
use serde::Serialize;
use std::collections::HashMap;

/// A camera as seen by the pipeline: fetched once per session, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraRef {
    pub id: i64,
    pub name: String,
    pub url: String,
}

impl From<CameraEntry> for CameraRef {
    fn from(entry: CameraEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            url: entry.url,
        }
    }
}

pub trait CameraRegistry: Send + Sync + 'static {
    fn get_camera(&self, id: i64) -> Option<CameraRef>;
    fn list_cameras(&self) -> Vec<CameraRef>;
}

#[derive(Debug, Default)]
pub struct InMemoryCameraRegistry {
    cameras: HashMap<i64, CameraRef>,
}

impl InMemoryCameraRegistry {
    pub fn new(entries: impl IntoIterator<Item = CameraEntry>) -> Self {
        let cameras = entries
            .into_iter()
            .map(|entry| (entry.id, CameraRef::from(entry)))
            .collect();
        Self { cameras }
    }
}

impl CameraRegistry for InMemoryCameraRegistry {
    fn get_camera(&self, id: i64) -> Option<CameraRef> {
        self.cameras.get(&id).cloned()
    }

    fn list_cameras(&self) -> Vec<CameraRef> {
        let mut cameras: Vec<CameraRef> = self.cameras.values().cloned().collect();
        cameras.sort_by_key(|camera| camera.id);
        cameras
    }
}
