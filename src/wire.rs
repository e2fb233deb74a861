use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{BookingError, Engine, now_local};
use crate::limits::MAX_WIRE_LINE_LEN;
use crate::model::*;
use crate::observability;

// ── Protocol frames ──────────────────────────────────────────────
//
// Newline-delimited JSON, one request per line, one response per line.
// The first frame must be a hello carrying the shared secret and the
// caller's principal id; everything after is a Request.

#[derive(Debug, Deserialize)]
struct Hello {
    op: String,
    user: Ulid,
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateBooking {
        resource_id: Ulid,
        date: NaiveDate,
        start_time: String,
        #[serde(default)]
        end_time: Option<String>,
        #[serde(default)]
        duration: Option<u8>,
        #[serde(flatten)]
        details: BookingDetails,
    },
    CancelBooking {
        booking_id: Ulid,
    },
    MyBookings,
    ResourceBookings {
        resource_id: Ulid,
        date: NaiveDate,
    },
    ListResources {
        #[serde(default)]
        filter: Option<ResourceFilter>,
        #[serde(default)]
        include_inactive: bool,
    },
    FreeSlots {
        resource_id: Ulid,
        date: NaiveDate,
        #[serde(default = "default_duration")]
        duration: u8,
    },
}

fn default_duration() -> u8 {
    1
}

/// How a booking goes over the wire: hours formatted back to "HH:00",
/// status replaced by the display label (upcoming/today/completed for
/// approved bookings).
#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub status: &'static str,
    #[serde(flatten)]
    pub details: BookingDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BookingView {
    pub fn of(booking: &Booking, today: NaiveDate) -> Self {
        Self {
            id: booking.id,
            resource_id: booking.resource_id,
            date: booking.date,
            start_time: format_hour(booking.slot.start),
            end_time: format_hour(booking.slot.end),
            status: display_status(booking, today),
            details: booking.details.clone(),
            notes: booking.notes.clone(),
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Parse "HH:00" (or "H:00") into an hour on the grid.
pub fn parse_hour(s: &str) -> Option<Hour> {
    let (hh, mm) = s.split_once(':')?;
    if mm != "00" {
        return None;
    }
    let hour: Hour = hh.parse().ok()?;
    (hour < 24).then_some(hour)
}

pub fn format_hour(hour: Hour) -> String {
    format!("{hour:02}:00")
}

/// Short machine-readable code for each failure, stable across releases.
pub fn error_code(err: &BookingError) -> &'static str {
    match err {
        BookingError::OutOfWindow(_)
        | BookingError::MissingField(_)
        | BookingError::CapacityExceeded { .. }
        | BookingError::WrongKind
        | BookingError::LimitExceeded(_)
        | BookingError::AlreadyExists(_) => "invalid",
        BookingError::ResourceNotFound(_) | BookingError::BookingNotFound(_) => "not_found",
        BookingError::SlotTaken(_) => "conflict",
        BookingError::NotOwner(_) => "forbidden",
        BookingError::TooLate => "too_late",
        BookingError::AlreadyClosed(_) => "already_closed",
        BookingError::WalError(_) => "internal",
    }
}

fn ok(payload: Value) -> Value {
    let mut v = json!({"ok": true});
    if let (Value::Object(base), Value::Object(extra)) = (&mut v, payload) {
        base.extend(extra);
    }
    v
}

fn err_response(code: &str, message: impl std::fmt::Display) -> Value {
    json!({"ok": false, "error": code, "message": message.to_string()})
}

fn booking_err(e: &BookingError) -> Value {
    err_response(error_code(e), e)
}

/// Serve one client connection: hello handshake, then a request loop.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    secret: String,
) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_WIRE_LINE_LEN));

    // First frame: hello
    let Some(first) = framed.next().await else {
        return Ok(()); // closed before hello
    };
    let first = first.map_err(std::io::Error::other)?;
    let user = match serde_json::from_str::<Hello>(&first) {
        Ok(hello) if hello.op == "hello" && hello.secret == secret => hello.user,
        Ok(_) | Err(_) => {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            warn!("rejected connection: bad hello");
            let resp = err_response("unauthorized", "hello with valid secret required");
            let _ = framed.send(resp.to_string()).await;
            return Ok(());
        }
    };
    framed
        .send(json!({"ok": true, "op": "hello"}).to_string())
        .await
        .map_err(std::io::Error::other)?;
    debug!(%user, "client authenticated");

    while let Some(line) = framed.next().await {
        let line = line.map_err(std::io::Error::other)?;
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                let op = observability::op_label(&request);
                let started = Instant::now();
                let response = handle_request(&engine, user, request).await;
                let status = if response["ok"].as_bool().unwrap_or(false) {
                    "ok"
                } else {
                    "error"
                };
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status)
                    .increment(1);
                metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
                    .record(started.elapsed().as_secs_f64());
                response
            }
            Err(e) => err_response("invalid", format!("malformed request: {e}")),
        };
        framed
            .send(response.to_string())
            .await
            .map_err(std::io::Error::other)?;
    }
    Ok(())
}

async fn handle_request(engine: &Engine, user: Ulid, request: Request) -> Value {
    let now = now_local();
    let today = now.date();
    match request {
        Request::CreateBooking {
            resource_id,
            date,
            start_time,
            end_time,
            duration,
            details,
        } => {
            let Some(start) = parse_hour(&start_time) else {
                return err_response("invalid", "start_time must be on the hour, e.g. \"10:00\"");
            };
            let duration = match (duration, end_time.as_deref().map(parse_hour)) {
                (Some(d), None) => d,
                (None, Some(Some(end))) if end > start => end - start,
                (Some(d), Some(Some(end))) if end > start && end - start == d => d,
                (None, None) => {
                    return err_response("invalid", "either duration or end_time is required");
                }
                _ => return err_response("invalid", "end_time does not match start_time/duration"),
            };
            match engine
                .request_booking(user, resource_id, date, start, duration, details, now)
                .await
            {
                Ok(booking) => ok(json!({"booking": BookingView::of(&booking, today)})),
                Err(e) => booking_err(&e),
            }
        }
        Request::CancelBooking { booking_id } => {
            match engine.cancel_booking(booking_id, user, now).await {
                Ok(booking) => ok(json!({"booking": BookingView::of(&booking, today)})),
                Err(e) => booking_err(&e),
            }
        }
        Request::MyBookings => {
            let bookings = engine.bookings_for_user(&user).await;
            let views: Vec<BookingView> =
                bookings.iter().map(|b| BookingView::of(b, today)).collect();
            ok(json!({"bookings": views}))
        }
        Request::ResourceBookings { resource_id, date } => {
            match engine.bookings_for_resource_on_date(&resource_id, date).await {
                Ok(bookings) => {
                    let views: Vec<BookingView> =
                        bookings.iter().map(|b| BookingView::of(b, today)).collect();
                    ok(json!({"bookings": views}))
                }
                Err(e) => booking_err(&e),
            }
        }
        Request::ListResources {
            filter,
            include_inactive,
        } => {
            let resources = engine.list_resources(filter, !include_inactive).await;
            let views: Vec<Value> = resources
                .iter()
                .map(|r| {
                    let mut v = json!({"id": r.id, "is_active": r.is_active});
                    if let (Value::Object(base), Value::Object(kind)) =
                        (&mut v, serde_json::to_value(&r.kind).unwrap_or_default())
                    {
                        base.extend(kind);
                    }
                    v
                })
                .collect();
            ok(json!({"resources": views}))
        }
        Request::FreeSlots {
            resource_id,
            date,
            duration,
        } => match engine.free_slots(&resource_id, date, duration).await {
            Ok(starts) => {
                let times: Vec<String> = starts.iter().copied().map(format_hour).collect();
                ok(json!({"start_times": times}))
            }
            Err(e) => booking_err(&e),
        },
    }
}
