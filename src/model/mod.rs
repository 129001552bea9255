//! Persistent device model
//!
//! Telemetry frames mutate this model; rendering reads from it on its own
//! fixed-rate clock. The two never block each other for long: frames apply
//! raw values under a short lock, and the render tick advances the smoothed
//! display values before handing a snapshot to the renderer.

mod spot;

pub use spot::SensorSpot;

use crate::config::{LayoutConfig, MotorBounds, RegionConfig};
use crate::events::ConsoleEvent;
use crate::telemetry::{DeviceUpdate, MotorUpdate};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Linear rescale of a value from one range onto another.
pub fn map_range(value: f64, from_lo: f64, from_hi: f64, to_lo: f64, to_hi: f64) -> f64 {
    if (from_hi - from_lo).abs() < f64::EPSILON {
        return to_lo;
    }
    (value - from_lo) * (to_hi - to_lo) / (from_hi - from_lo) + to_lo
}

/// Edge length of one rendered sensor spot, in pixels. Grid positions are
/// the region origin plus this much per row/column.
pub const SPOT_SIZE: f64 = 10.0;

/// Fixed arena of sensor spots for one region. Built once from the layout;
/// incoming matrices must match the configured dimensions exactly or the
/// whole region update is dropped.
pub struct SensorGrid {
    config: RegionConfig,
    spots: Vec<SensorSpot>,
}

impl SensorGrid {
    /// Allocate the arena with every spot at its final layout position
    pub fn new(config: RegionConfig) -> Self {
        let mut spots = Vec::with_capacity(config.rows * config.cols);
        for row in 0..config.rows {
            for col in 0..config.cols {
                spots.push(SensorSpot::new(
                    config.x + col as f64 * SPOT_SIZE,
                    config.y + row as f64 * SPOT_SIZE,
                ));
            }
        }
        Self { config, spots }
    }

    /// Region dimensions
    pub fn dimensions(&self) -> (usize, usize) {
        (self.config.rows, self.config.cols)
    }

    /// Spot at a validated row/column position
    pub fn spot(&self, row: usize, col: usize) -> Option<&SensorSpot> {
        if row >= self.config.rows || col >= self.config.cols {
            return None;
        }
        self.spots.get(row * self.config.cols + col)
    }

    /// Apply one region matrix. Dimensions are checked in full before any
    /// spot is mutated, so a malformed matrix never leaves the region half
    /// updated.
    pub fn apply(&mut self, matrix: &[Vec<u8>]) -> bool {
        if matrix.len() != self.config.rows {
            return false;
        }
        if matrix.iter().any(|row| row.len() != self.config.cols) {
            return false;
        }

        for (r, row) in matrix.iter().enumerate() {
            for (c, &value) in row.iter().enumerate() {
                self.spots[r * self.config.cols + c].set_value(value);
            }
        }
        true
    }

    /// Advance every spot's display value one step. Returns true if any
    /// spot moved.
    fn tick(&mut self) -> bool {
        let mut moved = false;
        for spot in &mut self.spots {
            moved |= spot.tick();
        }
        moved
    }

    fn snapshot_into(&self, cells: &mut Vec<RenderCell>) {
        for spot in &self.spots {
            cells.push(RenderCell {
                x: spot.x,
                y: spot.y,
                value: spot.display(),
            });
        }
    }
}

/// Last reported state of one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorState {
    /// Commanded position in raw device units
    pub target: i32,
    /// Measured position in raw device units
    pub current: i32,
}

/// One cell of a render snapshot, positioned in layout pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderCell {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// Whatever draws the pressure map implements this. The render task calls
/// it at a fixed rate with a snapshot of the smoothed display values.
pub trait Renderer: Send {
    fn render(&mut self, cells: &[RenderCell]);
}

struct ModelInner {
    regions: HashMap<String, SensorGrid>,
    motors: HashMap<String, MotorState>,
}

/// The full device model: sensor grids per region plus motor readouts.
pub struct DeviceModel {
    inner: Mutex<ModelInner>,
    motor_bounds: HashMap<String, MotorBounds>,
    events: mpsc::UnboundedSender<ConsoleEvent>,
    dirty: AtomicBool,
}

impl DeviceModel {
    /// Build the model's grid arenas from a layout
    pub fn new(
        layout: &LayoutConfig,
        motor_bounds: HashMap<String, MotorBounds>,
        events: mpsc::UnboundedSender<ConsoleEvent>,
    ) -> Self {
        let regions = layout
            .regions
            .iter()
            .map(|(name, config)| (name.clone(), SensorGrid::new(*config)))
            .collect();

        Self {
            inner: Mutex::new(ModelInner {
                regions,
                motors: HashMap::new(),
            }),
            motor_bounds,
            events,
            dirty: AtomicBool::new(false),
        }
    }

    /// Apply one decoded telemetry frame
    pub fn update(&self, frame: &DeviceUpdate) {
        self.update_sensors(&frame.sensors);
        self.update_motors(&frame.motors);
        self.dirty.store(true, Ordering::Release);
    }

    fn update_sensors(&self, sensors: &HashMap<String, Vec<Vec<u8>>>) {
        let mut inner = self.inner.lock();
        for (name, matrix) in sensors {
            match inner.regions.get_mut(name) {
                Some(grid) => {
                    if !grid.apply(matrix) {
                        let (rows, cols) = grid.dimensions();
                        warn!(
                            region = %name,
                            expected_rows = rows,
                            expected_cols = cols,
                            "Dropping sensor matrix with wrong dimensions"
                        );
                    }
                }
                None => {
                    debug!(region = %name, "Ignoring unknown sensor region");
                }
            }
        }
    }

    fn update_motors(&self, motors: &HashMap<String, MotorUpdate>) {
        let mut inner = self.inner.lock();
        for (name, update) in motors {
            let state = MotorState {
                target: update.target,
                current: update.current,
            };
            let previous = inner.motors.insert(name.clone(), state);
            if previous == Some(state) {
                continue;
            }
            let _ = self.events.send(ConsoleEvent::MotorReadout {
                name: name.clone(),
                text: self.readout_text(name, update.current),
            });
        }
    }

    /// Format a motor's current position on its configured display scale.
    /// Motors without configured bounds show the raw wire value.
    fn readout_text(&self, name: &str, current: i32) -> String {
        match self.motor_bounds.get(name) {
            Some(bounds) => {
                let scaled = map_range(f64::from(current), 0.0, 255.0, bounds.min, bounds.max);
                format!("{:.*}", bounds.precision(), scaled)
            }
            None => current.to_string(),
        }
    }

    /// Last reported state of a motor, if any frame has mentioned it
    pub fn motor(&self, name: &str) -> Option<MotorState> {
        self.inner.lock().motors.get(name).copied()
    }

    /// Smoothed display value of one spot, for inspection
    pub fn spot_display(&self, region: &str, row: usize, col: usize) -> Option<f64> {
        let inner = self.inner.lock();
        inner
            .regions
            .get(region)
            .and_then(|grid| grid.spot(row, col))
            .map(|spot| spot.display())
    }

    /// Latest raw value of one spot, for inspection
    pub fn spot_raw(&self, region: &str, row: usize, col: usize) -> Option<u8> {
        let inner = self.inner.lock();
        inner
            .regions
            .get(region)
            .and_then(|grid| grid.spot(row, col))
            .map(|spot| spot.raw())
    }

    /// Advance every display value one step. Returns true if anything moved.
    pub fn tick(&self) -> bool {
        let mut inner = self.inner.lock();
        let mut moved = false;
        for grid in inner.regions.values_mut() {
            moved |= grid.tick();
        }
        moved
    }

    /// Snapshot of all display values for rendering
    pub fn snapshot(&self) -> Vec<RenderCell> {
        let inner = self.inner.lock();
        let mut cells = Vec::new();
        for grid in inner.regions.values() {
            grid.snapshot_into(&mut cells);
        }
        cells
    }

    /// Take and clear the dirty flag
    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Drive a renderer at a fixed interval. Each tick advances the smoothed
/// display values and redraws only when something changed since the last
/// frame, so an idle telemetry stream costs nothing to display.
pub fn spawn_render_task(
    model: Arc<DeviceModel>,
    mut renderer: Box<dyn Renderer>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let moved = model.tick();
            if moved || model.take_dirty() {
                let cells = model.snapshot();
                renderer.render(&cells);
            }
        }
    })
}
