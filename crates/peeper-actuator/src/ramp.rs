//! Power-on sweep: duty 0 → 1 → 0 so every output is visibly exercised.

use std::time::Duration;

use peeper_settings::StartupSettings;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::controller::ActuatorController;

/// Sweep up over `rampMs` in `steps` steps, then back down.
///
/// Writes `steps + 1` duties each way. Returns `false` if cancelled part
/// way, in which case the duty is left at 0.
pub async fn run_startup_ramp(
    controller: &mut ActuatorController,
    settings: &StartupSettings,
    cancel: &CancellationToken,
) -> bool {
    let steps = settings.steps.max(1);
    let step = Duration::from_millis(settings.ramp_ms) / steps;
    info!(ramp_ms = settings.ramp_ms, steps, "startup ramp");

    let up = (0..=steps).map(|i| f64::from(i) / f64::from(steps));
    let down = (0..=steps).rev().map(|i| f64::from(i) / f64::from(steps));
    for duty in up.chain(down) {
        let _ = controller.set_duty(duty);
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = controller.set_duty(0.0);
                return false;
            }
            () = time::sleep(step) => {}
        }
    }

    info!("startup ramp complete");
    true
}
