//! Lines, clock and delays on ESP-IDF.
//!
//! Edge interrupts go through the IDF GPIO ISR service. Handlers run in interrupt context
//! from flash, so the service is installed without `ESP_INTR_FLAG_IRAM`.

use core::ffi::c_void;

use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_sys::{
    esp, esp_timer_get_time, gpio_install_isr_service, gpio_int_type_t_GPIO_INTR_NEGEDGE,
    gpio_intr_enable, gpio_isr_handler_add, gpio_isr_handler_remove,
    gpio_mode_t_GPIO_MODE_INPUT, gpio_mode_t_GPIO_MODE_OUTPUT_OD,
    gpio_pull_mode_t_GPIO_PULLUP_ONLY, gpio_reset_pin, gpio_set_direction, gpio_set_intr_type,
    gpio_set_level, gpio_set_pull_mode, EspError, ESP_ERR_INVALID_STATE,
};
use thiserror::Error;

use crate::line::{EdgeHandler, LineClaim, LineClaims, LineId, LineProvider, SignalLine};

/// Microseconds since boot from the high resolution timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EspTimer;

impl dht22::MicroTimer for EspTimer {
    fn now(&self) -> dht22::Microseconds {
        // Truncation is fine, instants are only ever subtracted with wrapping arithmetic
        dht22::Microseconds(unsafe { esp_timer_get_time() } as u32)
    }
}

/// Busy waits for microseconds, yields to the scheduler for milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct EspDelay;

impl embedded_hal::delay::DelayNs for EspDelay {
    fn delay_ns(&mut self, ns: u32) {
        Ets::delay_us(ns / 1000 + u32::from(ns % 1000 != 0));
    }

    fn delay_us(&mut self, us: u32) {
        Ets::delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}

#[derive(Error, Debug)]
pub enum EspLineError {
    #[error("Line {0} is already in use")]
    Claimed(LineId),
    #[error(transparent)]
    Esp(#[from] EspError),
}

/// The GPIO pins of the chip, addressed by number. A pin is handed out at most once.
pub struct EspLines {
    claims: LineClaims,
}

impl EspLines {
    pub fn new() -> Result<Self, EspError> {
        match esp!(unsafe { gpio_install_isr_service(0) }) {
            Ok(()) => {}
            // Someone else already installed the service, which is just as good
            Err(err) if err.code() == ESP_ERR_INVALID_STATE as i32 => {}
            Err(err) => return Err(err),
        }
        Ok(Self {
            claims: LineClaims::new(),
        })
    }
}

impl LineProvider for EspLines {
    type Line = EspLine;
    type Subscription = EspSubscription;
    type Error = EspLineError;

    fn request(&mut self, id: LineId) -> Result<EspLine, EspLineError> {
        let claim = self.claims.claim(id).ok_or(EspLineError::Claimed(id))?;
        let pin = id.0;
        esp!(unsafe { gpio_reset_pin(pin) })?;
        esp!(unsafe { gpio_set_pull_mode(pin, gpio_pull_mode_t_GPIO_PULLUP_ONLY) })?;
        Ok(EspLine {
            pin,
            _claim: claim,
        })
    }

    fn subscribe(
        &mut self,
        line: &mut EspLine,
        _id: LineId,
        handler: EdgeHandler,
    ) -> Result<EspSubscription, EspLineError> {
        esp!(unsafe { gpio_set_intr_type(line.pin, gpio_int_type_t_GPIO_INTR_NEGEDGE) })?;
        let handler = Box::into_raw(Box::new(handler));
        let subscription = EspSubscription {
            pin: line.pin,
            handler,
        };
        esp!(unsafe { gpio_isr_handler_add(line.pin, Some(on_falling_edge), handler.cast()) })?;
        esp!(unsafe { gpio_intr_enable(line.pin) })?;
        Ok(subscription)
    }
}

unsafe extern "C" fn on_falling_edge(arg: *mut c_void) {
    // Safety: `arg` is the handler of a live `EspSubscription`, which removes this ISR before
    // freeing it
    let handler = unsafe { &mut *arg.cast::<EdgeHandler>() };
    handler();
}

pub struct EspLine {
    pin: i32,
    // Released after the pin is reset
    _claim: LineClaim,
}

impl SignalLine for EspLine {
    type Error = EspError;

    fn drive_low(&mut self) -> Result<(), EspError> {
        esp!(unsafe { gpio_set_direction(self.pin, gpio_mode_t_GPIO_MODE_OUTPUT_OD) })?;
        esp!(unsafe { gpio_set_level(self.pin, 0) })
    }

    fn set_high(&mut self) -> Result<(), EspError> {
        esp!(unsafe { gpio_set_level(self.pin, 1) })
    }

    fn listen(&mut self) -> Result<(), EspError> {
        esp!(unsafe { gpio_set_direction(self.pin, gpio_mode_t_GPIO_MODE_INPUT) })
    }
}

impl Drop for EspLine {
    fn drop(&mut self) {
        // Back to the reset configuration, an input with pull-up
        let _ = unsafe { gpio_reset_pin(self.pin) };
    }
}

pub struct EspSubscription {
    pin: i32,
    handler: *mut EdgeHandler,
}

// Safety: the handler is `Send` and only touched by the ISR while registered
unsafe impl Send for EspSubscription {}

impl Drop for EspSubscription {
    fn drop(&mut self) {
        unsafe {
            gpio_isr_handler_remove(self.pin);
            drop(Box::from_raw(self.handler));
        }
    }
}
