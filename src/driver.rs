//! Output sinks: where finished buffers go.
//!
//! The engine only needs "publish this buffer". Hardware failures are logged
//! here and never reach the animation core.

use crate::{Color, StripConfig};

/// Physically renders a full buffer of packed `0xRRGGBB` colors.
pub trait StripDriver {
    fn publish(&mut self, buffer: &[u32]);
}

/// Dry-run driver that logs every published buffer.
#[derive(Debug, Default)]
pub struct LogDriver {
    published: u64,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StripDriver for LogDriver {
    fn publish(&mut self, buffer: &[u32]) {
        self.published += 1;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let colors: Vec<String> = buffer
                .iter()
                .map(|&value| Color::from_packed(value).to_string())
                .collect();
            tracing::debug!(frame = self.published, "strip: {}", colors.join(" "));
        }
    }
}

// ── WS281x hardware ──────────────────────────────────────────────────

/// Drives a WS2811/WS2812 strip over the Raspberry Pi's PWM/DMA peripheral.
///
/// # Rust concept: feature-gated modules
/// `rs_ws281x` builds a C library that only runs on a Pi, so the driver only
/// exists with the `hardware` feature. Everything else (including tests)
/// builds without it.
#[cfg(feature = "hardware")]
pub struct Ws281xDriver {
    controller: rs_ws281x::Controller,
}

#[cfg(feature = "hardware")]
impl Ws281xDriver {
    /// DMA channel used by the controller. Channel 10 is free on current Pi models.
    const DMA_CHANNEL: i32 = 10;
    /// WS2812 signalling frequency in Hz.
    const FREQUENCY: u32 = 800_000;

    pub fn new(strip: StripConfig) -> Result<Self, Box<dyn std::error::Error>> {
        use rs_ws281x::{ChannelBuilder, ControllerBuilder, StripType};

        let count = i32::try_from(strip.num_leds)?;
        let controller = ControllerBuilder::new()
            .freq(Self::FREQUENCY)
            .dma(Self::DMA_CHANNEL)
            .channel(
                0,
                ChannelBuilder::new()
                    .pin(strip.gpio_pin)
                    .count(count)
                    .strip_type(StripType::Ws2812)
                    .brightness(strip.brightness)
                    .build(),
            )
            .build()
            .map_err(|e| format!("failed to initialise WS281x controller: {e:?}"))?;

        Ok(Self { controller })
    }
}

#[cfg(feature = "hardware")]
impl StripDriver for Ws281xDriver {
    fn publish(&mut self, buffer: &[u32]) {
        let leds = self.controller.leds_mut(0);
        for (led, &value) in leds.iter_mut().zip(buffer) {
            let c = Color::from_packed(value);
            // The controller's raw layout is little-endian 0x00RRGGBB.
            *led = [c.b, c.g, c.r, 0];
        }
        if let Err(e) = self.controller.render() {
            tracing::error!("Failed to render strip: {:?}", e);
        }
    }
}

/// Build the output driver for this run.
///
/// Without the `hardware` feature, or with `dry_run`, buffers are only logged.
#[cfg_attr(not(feature = "hardware"), allow(unused_variables))]
pub fn create_driver(
    strip: StripConfig,
    dry_run: bool,
) -> Result<Box<dyn StripDriver>, Box<dyn std::error::Error>> {
    #[cfg(feature = "hardware")]
    if !dry_run {
        tracing::info!(
            "WS281x strip: {} LEDs on GPIO {}, brightness {}",
            strip.num_leds,
            strip.gpio_pin,
            strip.brightness
        );
        return Ok(Box::new(Ws281xDriver::new(strip)?));
    }

    tracing::info!("Dry run: logging {} LEDs instead of driving hardware", strip.num_leds);
    Ok(Box::new(LogDriver::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn log_driver_counts_publishes() {
        let mut driver = LogDriver::new();
        driver.publish(&[0xFF0000, 0]);
        driver.publish(&[0, 0]);
        assert_eq!(driver.published, 2);
    }

    #[test]
    fn dry_run_always_builds_a_driver() {
        let mut driver = create_driver(StripConfig::new(3), true).expect("dry run driver");
        driver.publish(&[1, 2, 3]);
    }
}
