//! Canvas assembly.
//!
//! The [`CanvasAssembler`] owns the output bitmap while tiles arrive. It is
//! driven by a single consumer, so writes need no locking: every tile covers
//! its own rectangle and results can be applied in any order.

use std::collections::BTreeMap;

use bytes::Bytes;
use image::{GenericImage, Rgb, RgbImage};
use tracing::{debug, warn};

use crate::error::{AssemblyError, FetchError, FetchReason};

use super::coordinator::FetchResult;
use super::grid::{ImageProperties, TileCoordinate, TileDescriptor, MAX_PIXELS};

/// Colour of regions whose tile could not be placed.
pub const DEFAULT_FILL: Rgb<u8> = Rgb([0, 0, 0]);

/// The finished canvas and every tile missing from it.
#[derive(Debug, Clone)]
pub struct AssembledImage {
    pub canvas: RgbImage,

    /// Failed tiles in row-major order
    pub missing: Vec<FetchError>,
}

impl AssembledImage {
    /// Whether every planned tile was placed.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    pub fn missing_coordinates(&self) -> Vec<TileCoordinate> {
        self.missing.iter().map(|e| e.coordinate).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Filled,
    Failed,
}

#[derive(Debug)]
struct Slot {
    address: String,
    state: SlotState,
}

/// Places fetched tiles on a canvas sized to the image.
#[derive(Debug)]
pub struct CanvasAssembler {
    canvas: RgbImage,
    slots: BTreeMap<TileCoordinate, Slot>,
    missing: Vec<FetchError>,
    filled: usize,
}

impl CanvasAssembler {
    /// Allocate a canvas for `props` expecting exactly `descriptors`.
    ///
    /// # Errors
    ///
    /// [`AssemblyError::CanvasTooLarge`] if the canvas exceeds [`MAX_PIXELS`]
    /// or its byte size does not fit in memory addressing.
    pub fn new(
        props: &ImageProperties,
        descriptors: &[TileDescriptor],
    ) -> Result<Self, AssemblyError> {
        Self::with_fill(props, descriptors, DEFAULT_FILL)
    }

    pub fn with_fill(
        props: &ImageProperties,
        descriptors: &[TileDescriptor],
        fill: Rgb<u8>,
    ) -> Result<Self, AssemblyError> {
        let bytes = (props.width as u64)
            .checked_mul(props.height as u64)
            .filter(|&pixels| pixels <= MAX_PIXELS)
            .and_then(|pixels| pixels.checked_mul(3))
            .and_then(|bytes| usize::try_from(bytes).ok());
        if bytes.is_none() {
            return Err(AssemblyError::CanvasTooLarge {
                width: props.width,
                height: props.height,
            });
        }

        let slots = descriptors
            .iter()
            .map(|d| {
                (
                    d.coordinate,
                    Slot {
                        address: d.source_address.clone(),
                        state: SlotState::Pending,
                    },
                )
            })
            .collect();

        Ok(Self {
            canvas: RgbImage::from_pixel(props.width, props.height, fill),
            slots,
            missing: Vec::new(),
            filled: 0,
        })
    }

    /// Tiles placed so far.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Tiles recorded as missing so far.
    pub fn failed(&self) -> usize {
        self.missing.len()
    }

    /// Planned tiles that have not been reported yet.
    pub fn pending(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.state == SlotState::Pending)
            .count()
    }

    /// Apply one fetch result.
    ///
    /// A failed fetch, an undecodable payload and a tile of the wrong size
    /// all leave the rectangle at the fill colour and are recorded as
    /// missing; none of them is an error here.
    ///
    /// # Errors
    ///
    /// Rejects descriptors outside the canvas, descriptors that are not part
    /// of the plan and tiles reported twice.
    pub fn write(&mut self, result: FetchResult) -> Result<(), AssemblyError> {
        let FetchResult {
            descriptor,
            outcome,
        } = result;
        let coordinate = descriptor.coordinate;

        let (end_x, end_y) = descriptor.end();
        if end_x > self.canvas.width() || end_y > self.canvas.height() {
            return Err(AssemblyError::OutOfBounds {
                col: coordinate.col,
                row: coordinate.row,
                width: self.canvas.width(),
                height: self.canvas.height(),
            });
        }

        let slot = self
            .slots
            .get_mut(&coordinate)
            .ok_or(AssemblyError::UnknownTile {
                col: coordinate.col,
                row: coordinate.row,
            })?;
        if slot.state != SlotState::Pending {
            return Err(AssemblyError::Duplicate {
                col: coordinate.col,
                row: coordinate.row,
            });
        }

        let placed = outcome.and_then(|bytes| place(&mut self.canvas, &descriptor, &bytes));
        match placed {
            Ok(()) => {
                slot.state = SlotState::Filled;
                self.filled += 1;
                debug!(col = coordinate.col, row = coordinate.row, "Tile placed");
            }
            Err(e) => {
                slot.state = SlotState::Failed;
                self.missing.push(e);
            }
        }
        Ok(())
    }

    /// Record every tile that was never reported as failed with `reason`.
    ///
    /// Returns the number of tiles marked.
    pub fn mark_unreported(&mut self, reason: FetchReason, message: &str) -> usize {
        let mut marked = 0;
        for (coordinate, slot) in self.slots.iter_mut() {
            if slot.state == SlotState::Pending {
                slot.state = SlotState::Failed;
                self.missing.push(FetchError::new(
                    *coordinate,
                    slot.address.clone(),
                    reason,
                    0,
                    message,
                ));
                marked += 1;
            }
        }
        if marked > 0 {
            warn!(tiles = marked, reason = %reason, "Marked unreported tiles as missing");
        }
        marked
    }

    /// Hand over the canvas together with the missing tiles.
    ///
    /// # Errors
    ///
    /// [`AssemblyError::Incomplete`] if some planned tile was neither placed
    /// nor recorded as missing.
    pub fn finish(self) -> Result<AssembledImage, AssemblyError> {
        let unreported = self.pending();
        if unreported > 0 {
            return Err(AssemblyError::Incomplete {
                expected: self.slots.len(),
                unreported,
            });
        }

        let mut missing = self.missing;
        missing.sort_by_key(|e| (e.coordinate.row, e.coordinate.col));

        Ok(AssembledImage {
            canvas: self.canvas,
            missing,
        })
    }
}

/// Decode a tile and copy it into its rectangle.
fn place(
    canvas: &mut RgbImage,
    descriptor: &TileDescriptor,
    bytes: &Bytes,
) -> Result<(), FetchError> {
    let corrupt = |message: String| {
        FetchError::new(
            descriptor.coordinate,
            descriptor.source_address.clone(),
            FetchReason::Corrupt,
            1,
            message,
        )
    };

    let tile = image::load_from_memory(bytes)
        .map_err(|e| corrupt(format!("undecodable tile: {}", e)))?
        .to_rgb8();

    if tile.dimensions() != (descriptor.width, descriptor.height) {
        return Err(corrupt(format!(
            "tile is {}x{}, expected {}x{}",
            tile.width(),
            tile.height(),
            descriptor.width,
            descriptor.height
        )));
    }

    canvas
        .copy_from(&tile, descriptor.origin.0, descriptor.origin.1)
        .map_err(|e| corrupt(e.to_string()))
}
