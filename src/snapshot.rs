//! Reading the state of the live map.
//!
//! The live view is an external collaborator; all the pipeline needs from it
//! is the current centre, zoom and the overlays it currently shows, each as a
//! kind name plus its serialised data. `read_snapshot` classifies those into
//! `LayerDescriptor`s and never touches the live map otherwise.

use crate::layers::{
    CircleDescriptor, LatLng, LayerDescriptor, MarkerDescriptor, PolygonDescriptor, TileDescriptor,
};
use crate::{Error, Result, SourceKind};
use serde::Deserialize;

/// An overlay as reported by the live view
#[derive(Debug, Clone, PartialEq)]
pub struct RawOverlay {
    pub kind: String,
    pub data: serde_json::Value,
}

/// Read access to a live, user-visible map
pub trait LiveMap {
    fn center(&self) -> LatLng;
    fn zoom(&self) -> f64;
    /// Overlays in the order they were added
    fn overlays(&self) -> Vec<RawOverlay>;
}

/// Immutable capture of a live map's view and overlays
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSnapshot {
    pub center: LatLng,
    pub zoom: f64,
    pub layers: Vec<LayerDescriptor>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Overlays of an unknown kind or with undecodable data
    pub skipped: usize,
}

/// Capture a `SurfaceSnapshot` from a live map
pub fn read_snapshot(map: Option<&dyn LiveMap>) -> Result<(SurfaceSnapshot, SnapshotStats)> {
    let map = map.ok_or(Error::MissingSourceError(SourceKind::Map))?;
    let mut stats = SnapshotStats::default();
    let mut layers = Vec::new();

    for overlay in map.overlays() {
        match classify(&overlay) {
            Some(Ok(desc)) => layers.push(desc),
            Some(Err(e)) => {
                log::warn!("skipping malformed {} overlay: {}", overlay.kind, e);
                stats.skipped += 1;
            }
            None => {
                log::debug!("skipping overlay of unknown kind `{}`", overlay.kind);
                stats.skipped += 1;
            }
        }
    }

    let snapshot = SurfaceSnapshot { center: map.center(), zoom: map.zoom(), layers };
    Ok((snapshot, stats))
}

fn classify(overlay: &RawOverlay) -> Option<std::result::Result<LayerDescriptor, serde_json::Error>> {
    let data = overlay.data.clone();
    let desc = match overlay.kind.as_str() {
        "tileLayer" | "tile" => TileDescriptor::deserialize(data).map(LayerDescriptor::Tile),
        "marker" => MarkerDescriptor::deserialize(data).map(LayerDescriptor::Marker),
        "circle" => CircleDescriptor::deserialize(data).map(LayerDescriptor::Circle),
        "polygon" => PolygonDescriptor::deserialize(data).map(LayerDescriptor::Polygon),
        _ => return None,
    };
    Some(desc)
}

#[derive(Deserialize)]
struct MapDocument {
    center: LatLng,
    zoom: f64,
    #[serde(default)]
    layers: Vec<serde_json::Value>,
}

/// A live map backed by the JSON the live view serialises:
/// `{ "center": [lat, lng], "zoom": 12, "layers": [{ "type": "marker", ... }] }`
#[derive(Debug, Clone)]
pub struct JsonLiveMap {
    center: LatLng,
    zoom: f64,
    overlays: Vec<RawOverlay>,
}

impl JsonLiveMap {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let doc: MapDocument = serde_json::from_value(value)
            .map_err(|e| Error::Other(format!("Invalid map document: {}", e)))?;
        let overlays = doc
            .layers
            .into_iter()
            .map(|v| {
                let kind = v.get("type").and_then(|t| t.as_str()).unwrap_or_default().to_string();
                RawOverlay { kind, data: v }
            })
            .collect();
        Ok(Self { center: doc.center, zoom: doc.zoom, overlays })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(s)
            .map_err(|e| Error::Other(format!("Invalid map document: {}", e)))?;
        Self::from_value(value)
    }
}

impl LiveMap for JsonLiveMap {
    fn center(&self) -> LatLng {
        self.center
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn overlays(&self) -> Vec<RawOverlay> {
        self.overlays.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerKind;

    fn sample() -> JsonLiveMap {
        JsonLiveMap::from_value(serde_json::json!({
            "center": [48.85, 2.35],
            "zoom": 12,
            "layers": [
                { "type": "tileLayer", "url": "https://{s}.tile.example.org/{z}/{x}/{y}.png" },
                { "type": "marker", "latlng": [48.86, 2.34] },
                { "type": "heatmap", "points": [] },
                { "type": "circle", "latlng": [48.85, 2.35], "radius": 300, "options": { "color": "red" } },
                { "type": "polygon", "latlngs": [[48.8, 2.3], [48.8, 2.4], [48.9, 2.4]] },
                { "type": "marker" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn classifies_known_kinds_and_skips_the_rest() {
        let map = sample();
        let (snap, stats) = read_snapshot(Some(&map)).unwrap();
        let kinds: Vec<_> = snap.layers.iter().map(|l| l.kind()).collect();
        assert_eq!(
            kinds,
            vec![LayerKind::Tile, LayerKind::Marker, LayerKind::Circle, LayerKind::Polygon]
        );
        // the heatmap and the marker without a position
        assert_eq!(stats.skipped, 2);
        assert_eq!(snap.zoom, 12.0);
        assert_eq!(snap.center, LatLng::new(48.85, 2.35));
    }

    #[test]
    fn absent_map_is_a_missing_source() {
        let err = read_snapshot(None).unwrap_err();
        assert!(matches!(err, Error::MissingSourceError(SourceKind::Map)));
    }

    #[test]
    fn reading_does_not_change_the_live_map() {
        let map = sample();
        let before = map.overlays();
        let _ = read_snapshot(Some(&map)).unwrap();
        assert_eq!(map.overlays(), before);
    }
}
