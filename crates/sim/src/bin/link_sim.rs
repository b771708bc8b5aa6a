//! Streams synthetic telemetry through a lossy channel and prints what
//! the ground side would see.
//!
//! ```text
//! link_sim [profile] [seconds]
//! ```
//!
//! Profiles: clear, urban, fringe.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rovercast_core::telemetry::VectorTelemetry;
use rovercast_core::Chipset;
use rovercast_radio::{LinkConfig, RxFrame, RxStream, TxStream};
use rovercast_sim::{profile_by_name, LossyChannel};
use tokio::sync::mpsc;
use tokio::time::interval;

const TELEMETRY_HZ: u64 = 50;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let profile_name = args.next().unwrap_or_else(|| "urban".to_string());
    let seconds: u64 = args
        .next()
        .unwrap_or_else(|| "10".to_string())
        .parse()
        .context("seconds must be a number")?;
    let Some(profile) = profile_by_name(&profile_name) else {
        bail!("unknown profile {profile_name:?} (clear, urban, fringe)");
    };

    log::info!("simulating {seconds}s of telemetry over the {profile_name} channel");

    let (air_tx, mut air_rx) = mpsc::channel::<Vec<u8>>(256);

    // air side: one telemetry record per control cycle
    let sender = tokio::spawn(async move {
        let cfg = LinkConfig::for_port(rovercast_core::PORT_TELEMETRY);
        let mut tx = TxStream::new(cfg).expect("tx setup");
        let mut ticker = interval(Duration::from_millis(1000 / TELEMETRY_HZ));
        let started = Instant::now();
        let mut records = 0u32;
        while started.elapsed() < Duration::from_secs(seconds) {
            ticker.tick().await;
            let record = VectorTelemetry {
                timestamp_ms: started.elapsed().as_millis() as u32,
                pack_voltage_x100: 1180,
                groundspeed_kph_x10: 85,
                sats_in_use: 12,
                ..Default::default()
            };
            let mut sink: Vec<Vec<u8>> = Vec::new();
            tx.write(&record.encode(), &mut sink).expect("tx write");
            records += 1;
            for frame in sink {
                if air_tx.send(frame).await.is_err() {
                    return records;
                }
            }
        }
        let mut sink: Vec<Vec<u8>> = Vec::new();
        tx.flush(&mut sink).expect("tx flush");
        for frame in sink {
            if air_tx.send(frame).await.is_err() {
                break;
            }
        }
        records
    });

    // the channel and the ground side share the receive task
    let receiver = tokio::spawn(async move {
        let cfg = LinkConfig::for_port(rovercast_core::PORT_TELEMETRY);
        let mut rx = RxStream::new(cfg).expect("rx setup");
        rx.stats_mut().add_adapter("sim0", Chipset::Ralink);
        let mut channel = LossyChannel::new(profile, StdRng::from_os_rng().next_u64());

        let mut stream = Vec::new();
        let mut records = 0u32;
        while let Some(frame) = air_rx.recv().await {
            let now = Instant::now();
            for payload in channel.transmit(vec![frame]) {
                rx.handle_frame(
                    &RxFrame {
                        payload,
                        dbm: Some(-70),
                        adapter: 0,
                    },
                    &mut stream,
                    now,
                )
                .expect("rx frame");
            }
            rx.tick(now);
            records += drain_records(&mut stream);
        }
        let now = Instant::now();
        rx.flush(&mut stream, now).expect("rx flush");
        records += drain_records(&mut stream);

        let snap = rx.stats().snapshot().clone();
        (records, snap)
    });

    let sent = sender.await?;
    let (received, snap) = receiver.await?;

    println!("records sent:      {sent}");
    println!("records decoded:   {received}");
    println!("blocks received:   {}", snap.received_block_cnt);
    println!("blocks damaged:    {}", snap.damaged_block_cnt);
    println!("packets lost:      {}", snap.lost_packet_cnt);
    println!("worst loss/block:  {}", snap.lost_per_block_cnt);
    Ok(())
}

/// Pulls complete telemetry records off the front of the decoded byte
/// stream, resynchronizing on the start code after damage.
fn drain_records(stream: &mut Vec<u8>) -> u32 {
    use rovercast_core::telemetry::TELEMETRY_LEN;

    let mut decoded = 0u32;
    let mut off = 0usize;
    while stream.len() - off >= TELEMETRY_LEN {
        match VectorTelemetry::decode(&stream[off..off + TELEMETRY_LEN]) {
            Ok(_) => {
                decoded += 1;
                off += TELEMETRY_LEN;
            }
            Err(_) => off += 1,
        }
    }
    stream.drain(..off);
    decoded
}
