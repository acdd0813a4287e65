// This file is part of Parallel-Sumo.
// Copyright © 2022, 2023, 2024, 2025 André de Palma, Lucas Javaudin
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Progress display for the coordinator.
use indicatif::{ProgressBar, ProgressStyle};
use log::{log_enabled, Level};

/// Progress over the released simulation steps.
///
/// A bar when the end time is known, a spinner otherwise; hidden entirely
/// when `Info` logging is off.
#[derive(Debug)]
pub struct StepProgress(ProgressBar);

impl StepProgress {
    pub fn new(end_time: Option<u64>) -> Self {
        if !log_enabled!(Level::Info) {
            return StepProgress(ProgressBar::hidden());
        }
        let bar = match end_time {
            Some(end) => {
                let bar = ProgressBar::new(end);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{bar:60} step {pos}/{len} ({eta})")
                        .unwrap(),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner} step {pos}")
                        .unwrap(),
                );
                bar
            }
        };
        StepProgress(bar)
    }

    /// Advances the display by one released step.
    pub fn inc(&self) {
        self.0.inc(1);
    }

    pub fn finish(&self) {
        self.0.finish_and_clear();
    }
}
