use chrono::{NaiveTime, Timelike};
use clap::Parser;

use nav_service::nav::router::{AStarRouter, Endpoint};
use nav_service::store::db::NavStore;

/// Earliest-arrival journey planner over a prepared timetable database
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the timetable database
    #[clap(long)]
    db_path: String,

    /// Start stop id
    #[clap(long, conflicts_with = "from_point")]
    from_stop: Option<i64>,

    /// Start point as "lat,lng"
    #[clap(long)]
    from_point: Option<String>,

    /// Destination stop id
    #[clap(long, conflicts_with = "to_point")]
    to_stop: Option<i64>,

    /// Destination point as "lat,lng"
    #[clap(long)]
    to_point: Option<String>,

    /// Departure time, HH:MM or HH:MM:SS
    #[clap(long, default_value = "08:00")]
    departure: String,

    /// Emit the itinerary as JSON instead of readable lines
    #[clap(long)]
    json: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let start = parse_endpoint(args.from_stop, args.from_point.as_deref(), "from");
    let destination = parse_endpoint(args.to_stop, args.to_point.as_deref(), "to");
    let starting_time = parse_departure(&args.departure);

    let store = NavStore::open(&args.db_path).unwrap_or_else(|err| {
        eprintln!("cannot open {}: {}", args.db_path, err);
        std::process::exit(1);
    });
    describe_endpoint(&store, start, "From");
    describe_endpoint(&store, destination, "To");

    let mut router = AStarRouter::from_store(store).unwrap_or_else(|err| {
        eprintln!("cannot read the stop table: {}", err);
        std::process::exit(1);
    });

    match router.route(starting_time, start, destination) {
        Ok(steps) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&steps).unwrap());
            } else {
                for step in &steps {
                    println!("{}", step);
                }
            }
        }
        Err(err) => {
            eprintln!("no itinerary: {}", err);
            std::process::exit(1);
        }
    }
}

fn parse_endpoint(stop: Option<i64>, point: Option<&str>, flag: &str) -> Endpoint {
    match (stop, point) {
        (Some(stop_id), None) => Endpoint::StopId(stop_id),
        (None, Some(point)) => {
            let (lat, lng) = parse_point(point).unwrap_or_else(|| {
                eprintln!("--{}-point must be \"lat,lng\", got {:?}", flag, point);
                std::process::exit(1);
            });
            Endpoint::Geopoint(lat, lng)
        }
        _ => {
            eprintln!("exactly one of --{}-stop / --{}-point is required", flag, flag);
            std::process::exit(1);
        }
    }
}

fn parse_point(text: &str) -> Option<(f64, f64)> {
    let (lat, lng) = text.split_once(',')?;
    Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}

fn parse_departure(text: &str) -> f64 {
    let time = NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .unwrap_or_else(|err| {
            eprintln!("cannot parse departure time {:?}: {}", text, err);
            std::process::exit(1);
        });
    time.num_seconds_from_midnight() as f64
}

fn describe_endpoint(store: &NavStore, endpoint: Endpoint, label: &str) {
    match endpoint {
        Endpoint::StopId(stop_id) => match store.stop_by_id(stop_id) {
            Ok(stop) => println!("{}: {}", label, stop.readable_identifier()),
            Err(err) => {
                eprintln!("unknown stop {}: {}", stop_id, err);
                std::process::exit(1);
            }
        },
        Endpoint::Geopoint(lat, lng) => println!("{}: point ({}, {})", label, lat, lng),
    }
}
