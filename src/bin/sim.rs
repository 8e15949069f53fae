//! Traffic simulator for the radar controller
//!
//! Connects to the controller's sensor port twice (one connection per sensor
//! cable) and drives vehicles through the two-sensor trap: axle edges on S1,
//! then a single S2 edge once the vehicle has covered the sensor distance.
//!
//! Usage:
//!   cargo run --bin radar-sim -- --speed-kmh 95 --axles 2 --count 3

use clap::Parser;
use radar_controller::domain::SensorId;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, sleep_until, Instant};

#[derive(Parser, Debug)]
#[command(name = "radar-sim", about = "Drive simulated vehicles through the sensor trap")]
struct Args {
    /// Controller sensor port
    #[arg(long, default_value = "127.0.0.1:7600")]
    addr: String,

    /// Vehicle speed
    #[arg(long, default_value = "60")]
    speed_kmh: f64,

    /// Axles per vehicle
    #[arg(long, default_value = "2")]
    axles: u32,

    /// Sensor spacing, must match radar.sensor_distance_mm
    #[arg(long, default_value = "1000")]
    distance_mm: u32,

    /// Number of vehicles
    #[arg(long, default_value = "1")]
    count: u32,

    /// Gap between vehicles
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Debounce window of the controller, used only to warn about merged axles
    #[arg(long, default_value = "100")]
    debounce_ms: u64,
}

/// Rejects NaN and infinity as well as non-positive speeds
fn valid_speed(speed_kmh: f64) -> bool {
    speed_kmh.is_finite() && speed_kmh > 0.0
}

/// Edge offsets from the first S1 edge for one vehicle
fn vehicle_schedule(speed_kmh: f64, axles: u32, distance_mm: u32) -> Vec<(Duration, SensorId)> {
    let elapsed_ms = distance_mm as f64 * 3.6 / speed_kmh;
    let axles = axles.max(1);
    let gap_ms = elapsed_ms / axles as f64;

    let mut schedule: Vec<(Duration, SensorId)> = (0..axles)
        .map(|i| (Duration::from_secs_f64(gap_ms * i as f64 / 1000.0), SensorId::S1))
        .collect();
    schedule.push((Duration::from_secs_f64(elapsed_ms / 1000.0), SensorId::S2));
    schedule
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if !valid_speed(args.speed_kmh) {
        anyhow::bail!("--speed-kmh must be a positive number");
    }

    let mut s1 = TcpStream::connect(&args.addr).await?;
    let mut s2 = TcpStream::connect(&args.addr).await?;
    s1.set_nodelay(true)?;
    s2.set_nodelay(true)?;

    let schedule = vehicle_schedule(args.speed_kmh, args.axles, args.distance_mm);
    let elapsed = schedule.last().map(|(at, _)| *at).unwrap_or_default();
    let gap_ms = if args.axles > 1 { schedule[1].0.as_millis() as u64 } else { 0 };

    println!(
        "Driving {} vehicle(s): {:.1} km/h, {} axles, {} mm -> elapsed {} ms",
        args.count,
        args.speed_kmh,
        args.axles,
        args.distance_mm,
        elapsed.as_millis()
    );
    if args.axles > 2 && gap_ms <= args.debounce_ms {
        println!(
            "  warning: axle gap {} ms is inside the {} ms debounce window, extra axles will merge",
            gap_ms, args.debounce_ms
        );
    }

    for vehicle in 1..=args.count {
        let start = Instant::now();
        for (offset, sensor) in &schedule {
            sleep_until(start + *offset).await;
            let stream = match sensor {
                SensorId::S1 => &mut s1,
                SensorId::S2 => &mut s2,
            };
            stream.write_all(format!("{}\n", sensor.as_str().to_uppercase()).as_bytes()).await?;
        }
        println!("  vehicle {} done", vehicle);

        if vehicle < args.count {
            sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    s1.shutdown().await?;
    s2.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_two_axles() {
        // 1 m at 36 km/h = 100 ms
        let schedule = vehicle_schedule(36.0, 2, 1000);
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule[0], (Duration::ZERO, SensorId::S1));
        assert_eq!(schedule[1].1, SensorId::S1);
        assert_eq!(schedule[2].1, SensorId::S2);
        assert_eq!(schedule[2].0.as_millis(), 100);
    }

    #[test]
    fn test_valid_speed() {
        assert!(valid_speed(60.0));
        assert!(!valid_speed(0.0));
        assert!(!valid_speed(-5.0));
        assert!(!valid_speed(f64::NAN));
        assert!(!valid_speed(f64::INFINITY));
    }

    #[test]
    fn test_schedule_axles_before_s2() {
        let schedule = vehicle_schedule(20.0, 5, 3000);
        let s2_at = schedule.last().unwrap().0;
        assert!(schedule[..5].iter().all(|(at, s)| *s == SensorId::S1 && *at < s2_at));
    }
}
