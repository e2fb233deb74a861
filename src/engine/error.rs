use ulid::Ulid;

/// Every way a booking operation can fail. All variants are surfaced to
/// the caller as distinct, user-displayable failures.
#[derive(Debug)]
pub enum BookingError {
    /// Slot off the hour grid or outside opening hours.
    OutOfWindow(&'static str),
    /// Required variant field absent or empty.
    MissingField(&'static str),
    /// Head-count above the resource's declared limit.
    CapacityExceeded { limit: u32, requested: u32 },
    /// Payload variant does not match the resource variant.
    WrongKind,
    /// Unknown or deactivated resource.
    ResourceNotFound(Ulid),
    /// Requested slot overlaps an active booking.
    SlotTaken(Ulid),
    BookingNotFound(Ulid),
    /// Acting on another user's booking.
    NotOwner(Ulid),
    /// Cancellation past the lead-time cutoff.
    TooLate,
    /// Booking already cancelled or rejected — nothing to do.
    AlreadyClosed(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::OutOfWindow(msg) => write!(f, "slot outside booking window: {msg}"),
            BookingError::MissingField(field) => write!(f, "missing required field: {field}"),
            BookingError::CapacityExceeded { limit, requested } => {
                write!(f, "capacity exceeded: {requested} requested, limit is {limit}")
            }
            BookingError::WrongKind => {
                write!(f, "booking details do not match the resource type")
            }
            BookingError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            BookingError::SlotTaken(id) => write!(f, "time slot already booked: {id}"),
            BookingError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::NotOwner(id) => {
                write!(f, "not authorized to modify booking: {id}")
            }
            BookingError::TooLate => {
                write!(f, "cancellation window closed: less than 2 hours to start")
            }
            BookingError::AlreadyClosed(id) => {
                write!(f, "booking already cancelled or rejected: {id}")
            }
            BookingError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}
