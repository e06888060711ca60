//! Station-mode WiFi link.
//!
//! The radio controller is shared with the provisioning access point, so it
//! lives behind a single-threaded shared cell; the orchestrator only ever
//! drives one of the two modes at a time.

use alloc::rc::Rc;
use core::cell::RefCell;

use embassy_net::{Runner, Stack};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice};
use log::{info, warn};

use sentinel_core::capabilities::{LinkError, NetworkLink};

/// Radio controller handle shared between station and AP roles. The
/// executor is single-threaded; borrows never overlap across roles.
pub type SharedController = Rc<RefCell<WifiController<'static>>>;

pub struct StaLink {
    controller: SharedController,
    stack: Stack<'static>,
}

impl StaLink {
    pub fn new(controller: SharedController, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }
}

impl NetworkLink for StaLink {
    fn is_up(&self) -> bool {
        // Link plus a DHCP lease; the exchange and broker need routable IP.
        self.stack.is_link_up() && self.stack.is_config_up()
    }

    async fn start_connect(&mut self, ssid: &str, password: &str) -> Result<(), LinkError> {
        let mut controller = self.controller.borrow_mut();

        let client = ClientConfig::default()
            .with_ssid(ssid.into())
            .with_password(password.into());
        controller
            .set_config(&ModeConfig::Client(client))
            .map_err(|err| {
                warn!("wifi station config rejected: {err:?}");
                LinkError::AssociationFailed
            })?;

        if !matches!(controller.is_started(), Ok(true)) {
            controller.start_async().await.map_err(|err| {
                warn!("wifi start failed: {err:?}");
                LinkError::AssociationFailed
            })?;
        }

        info!("associating with `{ssid}`");
        controller.connect_async().await.map_err(|err| {
            warn!("wifi connect failed: {err:?}");
            LinkError::AssociationFailed
        })?;
        Ok(())
    }
}

/// Background task driving one embassy-net stack (station or AP).
#[embassy_executor::task(pool_size = 2)]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}
