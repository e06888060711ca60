#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_net::StackResources;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Pull};
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use rtt_target::rprintln;
use static_cell::StaticCell;

use sentinel_core::capabilities::ConfigStore;
use sentinel_core::orchestrator::input::input_task;
use sentinel_core::orchestrator::network::{
    DEFAULT_DEVICE_ID, DEFAULT_TELEMETRY_TOPIC, NetExit, NetworkUnit,
};
use sentinel_core::orchestrator::{InputEventChannel, ModeWatch, Timing};
use sentinel_core::session::SessionCrypto;

use sentinel_firmware::exchange::HttpExchange;
use sentinel_firmware::provision::{ApProvisioner, intake_task};
use sentinel_firmware::rng::HwRng;
use sentinel_firmware::store::FlashStore;
use sentinel_firmware::telemetry::MqttTelemetry;
use sentinel_firmware::wifi::{StaLink, net_task};

extern crate alloc;
use alloc::rc::Rc;
use core::cell::RefCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

static STA_RESOURCES: StaticCell<StackResources<8>> = StaticCell::new();
static AP_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static MQTT_RX: StaticCell<[u8; 2048]> = StaticCell::new();
static MQTT_TX: StaticCell<[u8; 2048]> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_print!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 96 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    rprintln!("Embassy initialized!");

    let mut rng = Rng::new(peripherals.RNG);
    let net_seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());

    let radio_init = esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller");
    let (controller, interfaces) =
        esp_radio::wifi::new(&radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");
    let controller = Rc::new(RefCell::new(controller));

    // Station interface: DHCP, used in normal mode.
    let (sta_stack, sta_runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        STA_RESOURCES.init(StackResources::new()),
        net_seed,
    );

    // AP interface: static addressing, only live in config mode.
    let ap_config = embassy_net::Config::ipv4_static(embassy_net::StaticConfigV4 {
        address: embassy_net::Ipv4Cidr::new(embassy_net::Ipv4Address::new(192, 168, 4, 1), 24),
        gateway: Some(embassy_net::Ipv4Address::new(192, 168, 4, 1)),
        dns_servers: Default::default(),
    });
    let (ap_stack, ap_runner) = embassy_net::new(
        interfaces.ap,
        ap_config,
        AP_RESOURCES.init(StackResources::new()),
        net_seed ^ 0x5A5A_5A5A,
    );

    spawner.spawn(net_task(sta_runner)).expect("spawn sta net task");
    spawner.spawn(net_task(ap_runner)).expect("spawn ap net task");
    spawner.spawn(intake_task(ap_stack)).expect("spawn intake task");

    let mut store = FlashStore::new();
    let device_config = store.load();

    let unit = NetworkUnit {
        session: SessionCrypto::new(HwRng::new(rng)),
        link: StaLink::new(controller.clone(), sta_stack),
        exchange: HttpExchange::new(sta_stack, device_config.key_url.clone(), DEFAULT_DEVICE_ID),
        telemetry: MqttTelemetry::new(
            sta_stack,
            MQTT_RX.init([0; 2048]),
            MQTT_TX.init([0; 2048]),
            device_config.mqtt_server.clone(),
            device_config.mqtt_port,
            device_config.mqtt_user.clone(),
            device_config.mqtt_pass.clone(),
        ),
        provisioner: ApProvisioner::new(controller),
        store,
        config: device_config,
        timing: Timing::default(),
        device_id: DEFAULT_DEVICE_ID,
        topic: DEFAULT_TELEMETRY_TOPIC,
    };

    let button = Input::new(
        peripherals.GPIO14,
        InputConfig::default().with_pull(Pull::Up),
    );

    let events = InputEventChannel::new();
    let modes = ModeWatch::new();

    let exit = match select(
        input_task(button, true, Timing::default(), events.sender()),
        unit.run(events.receiver(), modes.sender()),
    )
    .await
    {
        Either::First(never) => never,
        Either::Second(exit) => exit,
    };

    let NetExit::Provisioned(config) = exit;
    rprintln!("Provisioned for `{}`; restarting", config.wifi_ssid);
    Timer::after(Duration::from_millis(500)).await;
    esp_hal::system::software_reset()
}
