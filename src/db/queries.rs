use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    Booking, BookingId, BookingStatus, Penalty, Rating, Slot, UserId, WorkHour, WORK_HOUR_START,
};

pub const DATE_FMT: &str = "%Y-%m-%d";
/// Millisecond precision keeps text comparison of `created_at` against a
/// computed cutoff exact.
pub const TS_FMT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const TS_PARSE_FMT: &str = "%Y-%m-%d %H:%M:%S%.f";

const BOOKING_COLUMNS: &str =
    "id, provider_id, client_id, date, hour_slot, status, created_at, confirmed_at";

pub fn fmt_date(date: &NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

pub fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FMT).to_string()
}

// ── Bookings ──

pub fn insert_draft(
    conn: &Connection,
    provider_id: UserId,
    client_id: UserId,
    date: &NaiveDate,
    slot: Slot,
    now: &NaiveDateTime,
) -> rusqlite::Result<BookingId> {
    conn.execute(
        "INSERT INTO bookings (provider_id, client_id, date, hour_slot, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            provider_id,
            client_id,
            fmt_date(date),
            slot,
            BookingStatus::Draft,
            fmt_ts(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn expire_client_drafts(conn: &Connection, client_id: UserId) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE bookings SET status = 'EXPIRED' WHERE client_id = ?1 AND status = 'DRAFT'",
        params![client_id],
    )
}

pub fn get_booking(conn: &Connection, id: BookingId) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        booking_from_row,
    )
    .optional()
}

/// Another CONFIRMED booking holding the same (provider, date, slot).
pub fn find_confirmed_holder(
    conn: &Connection,
    booking: &Booking,
) -> rusqlite::Result<Option<BookingId>> {
    conn.query_row(
        "SELECT id FROM bookings
         WHERE provider_id = ?1 AND date = ?2 AND hour_slot = ?3
           AND status = 'CONFIRMED' AND id != ?4
         LIMIT 1",
        params![
            booking.provider_id,
            fmt_date(&booking.date),
            booking.slot,
            booking.id
        ],
        |row| row.get(0),
    )
    .optional()
}

pub fn mark_confirmed(
    conn: &Connection,
    id: BookingId,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'CONFIRMED', confirmed_at = ?2
         WHERE id = ?1 AND status = 'DRAFT'",
        params![id, fmt_ts(now)],
    )?;
    Ok(count > 0)
}

/// Conditional status update; only applies while the row is still in `from`.
pub fn transition(
    conn: &Connection,
    id: BookingId,
    from: BookingStatus,
    to: BookingStatus,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![id, from, to],
    )?;
    Ok(count > 0)
}

pub fn confirmed_slots(
    conn: &Connection,
    provider_id: UserId,
    date: &NaiveDate,
) -> rusqlite::Result<Vec<Slot>> {
    let mut stmt = conn.prepare(
        "SELECT hour_slot FROM bookings
         WHERE provider_id = ?1 AND date = ?2 AND status = 'CONFIRMED'
         ORDER BY hour_slot",
    )?;
    let rows = stmt.query_map(params![provider_id, fmt_date(date)], |row| row.get(0))?;
    rows.collect()
}

/// CONFIRMED booking on a later date, or today with the slot not yet over.
pub fn active_booking(
    conn: &Connection,
    client_id: UserId,
    today: &NaiveDate,
    current_hour: u32,
) -> rusqlite::Result<Option<Booking>> {
    // slot end (WORK_HOUR_START + slot + 1) > current_hour
    let first_open_slot = current_hour as i64 - WORK_HOUR_START as i64;
    conn.query_row(
        &format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE client_id = ?1 AND status = 'CONFIRMED'
               AND (date > ?2 OR (date = ?2 AND hour_slot >= ?3))
             ORDER BY date, hour_slot
             LIMIT 1"
        ),
        params![client_id, fmt_date(today), first_open_slot],
        booking_from_row,
    )
    .optional()
}

pub fn today_usage(
    conn: &Connection,
    client_id: UserId,
    date: &NaiveDate,
) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE client_id = ?1 AND date = ?2 AND status IN ('DONE', 'CONFIRMED')
             LIMIT 1"
        ),
        params![client_id, fmt_date(date)],
        booking_from_row,
    )
    .optional()
}

pub fn unrated_done(conn: &Connection, client_id: UserId) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        "SELECT b.id, b.provider_id, b.client_id, b.date, b.hour_slot, b.status,
                b.created_at, b.confirmed_at
         FROM bookings b
         LEFT JOIN ratings r ON r.booking_id = b.id
         WHERE b.client_id = ?1 AND b.status = 'DONE' AND r.id IS NULL
         ORDER BY b.date DESC, b.hour_slot DESC
         LIMIT 1",
        params![client_id],
        booking_from_row,
    )
    .optional()
}

pub fn client_draft(conn: &Connection, client_id: UserId) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE client_id = ?1 AND status = 'DRAFT'
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        ),
        params![client_id],
        booking_from_row,
    )
    .optional()
}

pub fn expire_drafts_created_by(
    conn: &Connection,
    cutoff: &NaiveDateTime,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE bookings SET status = 'EXPIRED' WHERE status = 'DRAFT' AND created_at <= ?1",
        params![fmt_ts(cutoff)],
    )
}

pub fn close_confirmed_before(conn: &Connection, date: &NaiveDate) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE bookings SET status = 'DONE' WHERE status = 'CONFIRMED' AND date < ?1",
        params![fmt_date(date)],
    )
}

/// CONFIRMED bookings on `date`, earliest slot first.
pub fn confirmed_on(conn: &Connection, date: &NaiveDate) -> rusqlite::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE date = ?1 AND status = 'CONFIRMED'
         ORDER BY hour_slot, id"
    ))?;
    let rows = stmt.query_map(params![fmt_date(date)], booking_from_row)?;
    rows.collect()
}

pub fn count_confirmed_from(
    conn: &Connection,
    provider_id: UserId,
    slot: Slot,
    from_date: &NaiveDate,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE provider_id = ?1 AND hour_slot = ?2 AND date >= ?3 AND status = 'CONFIRMED'",
        params![provider_id, slot, fmt_date(from_date)],
        |row| row.get(0),
    )
}

fn booking_from_row(row: &Row) -> rusqlite::Result<Booking> {
    let date: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let confirmed_at: Option<String> = row.get(7)?;

    Ok(Booking {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        client_id: row.get(2)?,
        date: parse_date(3, &date)?,
        slot: row.get(4)?,
        status: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        confirmed_at: confirmed_at.map(|s| parse_ts(7, &s)).transpose()?,
    })
}

fn parse_date(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_PARSE_FMT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ── Work Hours ──

/// Seed all sixteen slots disabled. Existing rows are left alone.
pub fn init_work_hours(conn: &Connection, provider_id: UserId) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO work_hours (provider_id, hour_slot, is_enabled) VALUES (?1, ?2, 0)",
    )?;
    for slot in Slot::all() {
        stmt.execute(params![provider_id, slot])?;
    }
    Ok(())
}

/// Whether the provider has opened `slot`. A provider without a grid has
/// nothing open.
pub fn work_hour_enabled(
    conn: &Connection,
    provider_id: UserId,
    slot: Slot,
) -> rusqlite::Result<bool> {
    let enabled = conn
        .query_row(
            "SELECT is_enabled FROM work_hours WHERE provider_id = ?1 AND hour_slot = ?2",
            params![provider_id, slot],
            |row| row.get::<_, i32>(0),
        )
        .optional()?;
    Ok(enabled.is_some_and(|v| v != 0))
}

/// Flip one slot. Returns the new flag, or `None` if the provider has no grid.
pub fn toggle_work_hour(
    conn: &Connection,
    provider_id: UserId,
    slot: Slot,
) -> rusqlite::Result<Option<bool>> {
    let count = conn.execute(
        "UPDATE work_hours SET is_enabled = CASE WHEN is_enabled = 1 THEN 0 ELSE 1 END
         WHERE provider_id = ?1 AND hour_slot = ?2",
        params![provider_id, slot],
    )?;
    if count == 0 {
        return Ok(None);
    }
    conn.query_row(
        "SELECT is_enabled FROM work_hours WHERE provider_id = ?1 AND hour_slot = ?2",
        params![provider_id, slot],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )
    .optional()
}

pub fn work_hours(conn: &Connection, provider_id: UserId) -> rusqlite::Result<Vec<WorkHour>> {
    let mut stmt = conn.prepare(
        "SELECT provider_id, hour_slot, is_enabled FROM work_hours
         WHERE provider_id = ?1 ORDER BY hour_slot",
    )?;
    let rows = stmt.query_map(params![provider_id], |row| {
        Ok(WorkHour {
            provider_id: row.get(0)?,
            slot: row.get(1)?,
            enabled: row.get::<_, i32>(2)? != 0,
        })
    })?;
    rows.collect()
}

// ── Penalties ──

pub fn insert_penalty(
    conn: &Connection,
    client_id: UserId,
    date: &NaiveDate,
    reason: &str,
    now: &NaiveDateTime,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO penalties (client_id, date, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![client_id, fmt_date(date), reason, fmt_ts(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count_penalties(
    conn: &Connection,
    client_id: UserId,
    date: &NaiveDate,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM penalties WHERE client_id = ?1 AND date = ?2",
        params![client_id, fmt_date(date)],
        |row| row.get(0),
    )
}

pub fn penalties_for_client(
    conn: &Connection,
    client_id: UserId,
) -> rusqlite::Result<Vec<Penalty>> {
    let mut stmt = conn.prepare(
        "SELECT id, client_id, date, reason, created_at FROM penalties
         WHERE client_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![client_id], |row| {
        let date: String = row.get(2)?;
        let created_at: String = row.get(4)?;
        Ok(Penalty {
            id: row.get(0)?,
            client_id: row.get(1)?,
            date: parse_date(2, &date)?,
            reason: row.get(3)?,
            created_at: parse_ts(4, &created_at)?,
        })
    })?;
    rows.collect()
}

// ── Ratings ──

pub fn insert_rating(
    conn: &Connection,
    booking: &Booking,
    stars: u8,
    comment: Option<&str>,
    now: &NaiveDateTime,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO ratings (booking_id, provider_id, client_id, stars, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            booking.id,
            booking.provider_id,
            booking.client_id,
            stars,
            comment,
            fmt_ts(now)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn rating_for_booking(
    conn: &Connection,
    booking_id: BookingId,
) -> rusqlite::Result<Option<Rating>> {
    conn.query_row(
        "SELECT id, booking_id, provider_id, client_id, stars, comment, created_at
         FROM ratings WHERE booking_id = ?1",
        params![booking_id],
        |row| {
            let created_at: String = row.get(6)?;
            Ok(Rating {
                id: row.get(0)?,
                booking_id: row.get(1)?,
                provider_id: row.get(2)?,
                client_id: row.get(3)?,
                stars: row.get(4)?,
                comment: row.get(5)?,
                created_at: parse_ts(6, &created_at)?,
            })
        },
    )
    .optional()
}

pub fn update_rating_comment(
    conn: &Connection,
    booking_id: BookingId,
    comment: &str,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE ratings SET comment = ?2 WHERE booking_id = ?1",
        params![booking_id, comment],
    )?;
    Ok(count > 0)
}

/// Average stars and number of ratings for a provider.
pub fn provider_rating(conn: &Connection, provider_id: UserId) -> rusqlite::Result<(f64, i64)> {
    conn.query_row(
        "SELECT COALESCE(AVG(stars), 0.0), COUNT(*) FROM ratings WHERE provider_id = ?1",
        params![provider_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FMT).unwrap()
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TS_PARSE_FMT).unwrap()
    }

    fn slot(i: u8) -> Slot {
        Slot::new(i).unwrap()
    }

    fn confirmed(
        conn: &Connection,
        provider: UserId,
        client: UserId,
        d: &str,
        s: u8,
    ) -> BookingId {
        let created = ts("2025-06-16 03:00:00");
        let id = insert_draft(conn, provider, client, &date(d), slot(s), &created).unwrap();
        assert!(mark_confirmed(conn, id, &ts("2025-06-16 03:01:00")).unwrap());
        id
    }

    #[test]
    fn test_insert_and_get_booking() {
        let conn = setup_db();
        let created = ts("2025-06-16 07:00:00");
        let id = insert_draft(&conn, 1, 2, &date("2025-06-16"), slot(6), &created).unwrap();

        let booking = get_booking(&conn, id).unwrap().unwrap();
        assert_eq!(booking.provider_id, 1);
        assert_eq!(booking.client_id, 2);
        assert_eq!(booking.slot, slot(6));
        assert_eq!(booking.status, BookingStatus::Draft);
        assert_eq!(booking.confirmed_at, None);

        assert!(get_booking(&conn, id + 100).unwrap().is_none());
    }

    #[test]
    fn test_transition_is_guarded_by_status() {
        let conn = setup_db();
        let id = confirmed(&conn, 1, 2, "2025-06-16", 3);

        assert!(!transition(&conn, id, BookingStatus::Draft, BookingStatus::Expired).unwrap());
        assert!(transition(&conn, id, BookingStatus::Confirmed, BookingStatus::Done).unwrap());
        assert_eq!(get_booking(&conn, id).unwrap().unwrap().status, BookingStatus::Done);
    }

    #[test]
    fn test_confirmed_slots_and_holder() {
        let conn = setup_db();
        let held = confirmed(&conn, 1, 2, "2025-06-16", 6);
        confirmed(&conn, 1, 3, "2025-06-16", 2);
        confirmed(&conn, 9, 4, "2025-06-16", 7);

        let slots = confirmed_slots(&conn, 1, &date("2025-06-16")).unwrap();
        assert_eq!(slots, vec![slot(2), slot(6)]);

        let created = ts("2025-06-16 04:00:00");
        let draft = insert_draft(&conn, 1, 5, &date("2025-06-16"), slot(6), &created).unwrap();
        let draft = get_booking(&conn, draft).unwrap().unwrap();
        assert_eq!(find_confirmed_holder(&conn, &draft).unwrap(), Some(held));
    }

    #[test]
    fn test_active_booking_window() {
        let conn = setup_db();
        let id = confirmed(&conn, 1, 2, "2025-06-16", 6); // 14:00-15:00

        let active = active_booking(&conn, 2, &date("2025-06-16"), 14).unwrap();
        assert_eq!(active.map(|b| b.id), Some(id));
        assert!(active_booking(&conn, 2, &date("2025-06-16"), 15).unwrap().is_none());
        assert!(active_booking(&conn, 2, &date("2025-06-15"), 23).unwrap().is_some());
    }

    #[test]
    fn test_unrated_done() {
        let conn = setup_db();
        let id = confirmed(&conn, 1, 2, "2025-06-16", 1);
        assert!(unrated_done(&conn, 2).unwrap().is_none());

        transition(&conn, id, BookingStatus::Confirmed, BookingStatus::Done).unwrap();
        let booking = unrated_done(&conn, 2).unwrap().unwrap();
        assert_eq!(booking.id, id);

        insert_rating(&conn, &booking, 5, None, &ts("2025-06-16 10:00:00")).unwrap();
        assert!(unrated_done(&conn, 2).unwrap().is_none());
    }

    #[test]
    fn test_rating_is_unique_per_booking() {
        let conn = setup_db();
        let id = confirmed(&conn, 1, 2, "2025-06-16", 1);
        transition(&conn, id, BookingStatus::Confirmed, BookingStatus::Done).unwrap();
        let booking = get_booking(&conn, id).unwrap().unwrap();

        insert_rating(&conn, &booking, 4, Some("good"), &ts("2025-06-16 10:00:00")).unwrap();
        assert!(insert_rating(&conn, &booking, 5, None, &ts("2025-06-16 10:01:00")).is_err());

        assert!(update_rating_comment(&conn, id, "great").unwrap());
        let rating = rating_for_booking(&conn, id).unwrap().unwrap();
        assert_eq!(rating.stars, 4);
        assert_eq!(rating.comment.as_deref(), Some("great"));
        assert_eq!(provider_rating(&conn, 1).unwrap(), (4.0, 1));
    }

    #[test]
    fn test_confirmed_on_lists_one_day() {
        let conn = setup_db();
        let late = confirmed(&conn, 1, 2, "2025-06-16", 9);
        let early = confirmed(&conn, 1, 3, "2025-06-16", 6);
        confirmed(&conn, 1, 4, "2025-06-17", 6);

        let ids: Vec<BookingId> = confirmed_on(&conn, &date("2025-06-16"))
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[test]
    fn test_draft_expiry_is_exact_to_the_millisecond() {
        let conn = setup_db();
        let created = ts("2025-06-16 07:00:00.900");
        let id = insert_draft(&conn, 1, 2, &date("2025-06-16"), slot(6), &created).unwrap();
        assert_eq!(get_booking(&conn, id).unwrap().unwrap().created_at, created);

        // cutoff inside the same second as created_at, but before it
        assert_eq!(expire_drafts_created_by(&conn, &ts("2025-06-16 07:00:00.500")).unwrap(), 0);
        assert_eq!(expire_drafts_created_by(&conn, &ts("2025-06-16 07:00:00.900")).unwrap(), 1);
    }

    #[test]
    fn test_work_hour_grid() {
        let conn = setup_db();
        assert_eq!(toggle_work_hour(&conn, 1, slot(6)).unwrap(), None);

        init_work_hours(&conn, 1).unwrap();
        init_work_hours(&conn, 1).unwrap();
        let grid = work_hours(&conn, 1).unwrap();
        assert_eq!(grid.len(), 16);
        assert!(grid.iter().all(|wh| !wh.enabled));

        assert_eq!(toggle_work_hour(&conn, 1, slot(6)).unwrap(), Some(true));
        assert_eq!(toggle_work_hour(&conn, 1, slot(6)).unwrap(), Some(false));
        assert_eq!(toggle_work_hour(&conn, 1, slot(7)).unwrap(), Some(true));
        assert!(work_hour_enabled(&conn, 1, slot(7)).unwrap());
        assert!(!work_hour_enabled(&conn, 1, slot(6)).unwrap());
        assert!(!work_hour_enabled(&conn, 2, slot(7)).unwrap(), "no grid, nothing open");

        let enabled: Vec<Slot> = work_hours(&conn, 1)
            .unwrap()
            .into_iter()
            .filter(|wh| wh.enabled)
            .map(|wh| wh.slot)
            .collect();
        assert_eq!(enabled, vec![slot(7)]);
    }

    #[test]
    fn test_penalties() {
        let conn = setup_db();
        insert_penalty(&conn, 2, &date("2025-06-16"), "late", &ts("2025-06-16 08:00:00")).unwrap();
        insert_penalty(&conn, 2, &date("2025-06-17"), "late", &ts("2025-06-17 08:00:00")).unwrap();

        assert_eq!(count_penalties(&conn, 2, &date("2025-06-16")).unwrap(), 1);
        assert_eq!(penalties_for_client(&conn, 2).unwrap().len(), 2);
        assert!(penalties_for_client(&conn, 3).unwrap().is_empty());
    }
}
