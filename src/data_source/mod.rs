//! 外部データソース (スリッピーマップタイル等) からのラスタ取得

pub mod slippy;

use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{info, warn};

use crate::extents::Extents;
use crate::raster::RasterData;

pub use slippy::{SlippyTileOptions, SlippyTileSource, TileFetcher, TilePayload, TileRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestDataType {
    Satellite,
    Terrain,
    Vector,
}

impl fmt::Display for RequestDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestDataType::Satellite => "satellite",
            RequestDataType::Terrain => "terrain",
            RequestDataType::Vector => "vector",
        };
        write!(f, "{}", name)
    }
}

/// Capability interface of a source that delivers raster descriptors for an area.
pub trait DataSource {
    fn is_valid(&self) -> bool;

    fn set_working_dir(&mut self, dir: &Path);

    /// Requested area in geographic coordinates (lon/lat), for landscape tile `tile_index`.
    fn set_extents(&mut self, extents: Extents, tile_index: usize);

    fn fetch_data(&self, kind: RequestDataType) -> FetchHandle;
}

/// Source used when nothing is configured.
#[derive(Debug, Default)]
pub struct DefaultDataSource;

impl DataSource for DefaultDataSource {
    fn is_valid(&self) -> bool {
        false
    }

    fn set_working_dir(&mut self, _dir: &Path) {}

    fn set_extents(&mut self, _extents: Extents, _tile_index: usize) {}

    fn fetch_data(&self, kind: RequestDataType) -> FetchHandle {
        warn!("No data source configured - cannot fetch {} data", kind);
        FetchHandle::ready(Vec::new(), 0)
    }
}

/// Picks the slippy-map source when a fetcher is available, the default source otherwise.
pub fn select_data_source<F: TileFetcher>(fetcher: Option<F>, options: SlippyTileOptions) -> Box<dyn DataSource> {
    match fetcher {
        Some(fetcher) => Box::new(SlippyTileSource::new(fetcher, options)),
        None => Box::new(DefaultDataSource),
    }
}

/// Result of one fetch: every successfully delivered descriptor, in request order.
#[derive(Debug, Default)]
pub struct FetchResult {
    pub datas: Vec<RasterData>,
    pub tile_index: usize,
    pub failed: usize,
}

/// Sending half handed to each request. Completes the request exactly once:
/// either via [`Completion::finish`], [`Completion::abort`], or on drop.
#[derive(Debug)]
pub struct Completion {
    slot: usize,
    sender: Option<Sender<(usize, Option<RasterData>)>>,
}

impl Completion {
    pub fn finish(mut self, data: RasterData) {
        self.send(Some(data));
    }

    pub fn abort(mut self) {
        self.send(None);
    }

    fn send(&mut self, data: Option<RasterData>) {
        if let Some(sender) = self.sender.take() {
            // 受信側が先に破棄されていても無視する
            let _ = sender.send((self.slot, data));
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.send(None);
    }
}

/// Aggregation point of a fetch. [`FetchHandle::wait`] returns once every
/// expected request has completed.
#[derive(Debug)]
pub struct FetchHandle {
    receiver: Option<Receiver<(usize, Option<RasterData>)>>,
    expected: usize,
    tile_index: usize,
    ready: Vec<RasterData>,
}

impl FetchHandle {
    /// A handle that is already complete.
    pub fn ready(datas: Vec<RasterData>, tile_index: usize) -> Self {
        Self {
            receiver: None,
            expected: 0,
            tile_index,
            ready: datas,
        }
    }

    /// A handle expecting `expected` completions, plus one [`Completion`] per request.
    pub fn channel(expected: usize, tile_index: usize) -> (Self, Vec<Completion>) {
        let (sender, receiver) = mpsc::channel();
        let completions = (0..expected)
            .map(|slot| Completion {
                slot,
                sender: Some(sender.clone()),
            })
            .collect();
        let handle = Self {
            receiver: Some(receiver),
            expected,
            tile_index,
            ready: Vec::new(),
        };
        (handle, completions)
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn wait(self) -> FetchResult {
        let Some(receiver) = self.receiver else {
            return FetchResult {
                datas: self.ready,
                tile_index: self.tile_index,
                failed: 0,
            };
        };

        let mut slots: Vec<Option<RasterData>> = vec![None; self.expected];
        let mut completed = 0;
        let mut failed = 0;
        while completed < self.expected {
            match receiver.recv() {
                Ok((slot, data)) => {
                    completed += 1;
                    match data {
                        Some(data) if slot < slots.len() => slots[slot] = Some(data),
                        _ => failed += 1,
                    }
                }
                // 全ての送信側が破棄された
                Err(_) => {
                    failed += self.expected - completed;
                    break;
                }
            }
        }
        info!("Requests done: {} of {} failed", failed, self.expected);
        FetchResult {
            datas: slots.into_iter().flatten().collect(),
            tile_index: self.tile_index,
            failed,
        }
    }
}
