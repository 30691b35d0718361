// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

// 连接模式
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Simulation,
    Hardware,
}

// 切换控制器发回来的三条确认线
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum SwitchLine {
    ElectrodeChanged,
    ChipChanged,
    CycleComplete,
}

impl fmt::Display for SwitchLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwitchLine::ElectrodeChanged => "electrode-changed",
            SwitchLine::ChipChanged => "chip-changed",
            SwitchLine::CycleComplete => "cycle-complete",
        };
        f.write_str(name)
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Edge {
    Rising,
    Falling,
}

// 一次边沿事件
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct LineEvent {
    pub line: SwitchLine,
    pub edge: Edge,
}

impl LineEvent {
    pub fn rising(line: SwitchLine) -> Self {
        Self { line, edge: Edge::Rising }
    }
    pub fn falling(line: SwitchLine) -> Self {
        Self { line, edge: Edge::Falling }
    }
}

// 握手状态
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum CycleState {
    #[default]
    Idle,
    AwaitingElectrodeAck,
    AwaitingChipAck,
    AwaitingCycleAck,
}

impl CycleState {
    /// The acknowledgement line this state is waiting for.
    pub fn expected_line(self) -> Option<SwitchLine> {
        match self {
            CycleState::Idle => None,
            CycleState::AwaitingElectrodeAck => Some(SwitchLine::ElectrodeChanged),
            CycleState::AwaitingChipAck => Some(SwitchLine::ChipChanged),
            CycleState::AwaitingCycleAck => Some(SwitchLine::CycleComplete),
        }
    }
}
