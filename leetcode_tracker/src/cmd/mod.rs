pub mod fetch;
pub mod import;
pub mod server;

use clap::ValueEnum;
use leetcode_tracker_libs::leetcode::model::ContestType;
use std::fmt;

#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Weekly,
    Biweekly,
    Manual,
}

impl TriggerKind {
    /// スケジュール起動のトリガーが対象とするコンテストサイクル。
    /// 手動トリガーは種別を限定しない。
    pub fn cycle(&self) -> Option<ContestType> {
        match self {
            TriggerKind::Weekly => Some(ContestType::Weekly),
            TriggerKind::Biweekly => Some(ContestType::Biweekly),
            TriggerKind::Manual => None,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TriggerKind::Weekly => write!(f, "weekly"),
            TriggerKind::Biweekly => write!(f, "biweekly"),
            TriggerKind::Manual => write!(f, "manual"),
        }
    }
}
