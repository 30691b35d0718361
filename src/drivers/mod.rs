// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod curve;
pub mod detector;
pub mod error;
pub mod filter;
pub mod instrument;
pub mod mscript;
pub mod peaks;
pub mod plot;
pub mod window;
// 公开导出这些模块里的结构体，方便外部调用
pub use curve::{Column, Curve};
pub use detector::{PeakBaseline, PeakBaselineDetector};
pub use error::ScanError;
pub use instrument::{DeviceType, Instrument};
pub use plot::{render_sweeps_png, PlotStyle, SweepSeries};
pub use window::ScanWindow;
