use bson::Bson;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::{
    codec::{CodecContext, TypedCodec, unexpected},
    error::{OdmError, OdmResult},
    options::DateStorage,
};

fn instant_from_bson(value: &Bson, target: &str) -> OdmResult<DateTime<Utc>> {
    match value {
        Bson::DateTime(stored) => DateTime::from_timestamp_millis(stored.timestamp_millis())
            .ok_or_else(|| OdmError::conversion("DateTime", target, format!("{stored} is out of range"))),
        Bson::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|err| OdmError::conversion("String", target, format!("'{text}': {err}"))),
        other => Err(unexpected(other, target)),
    }
}

fn naive_to_millis(value: &NaiveDateTime, storage: DateStorage) -> OdmResult<i64> {
    match storage {
        DateStorage::Utc => Ok(value.and_utc().timestamp_millis()),
        DateStorage::Local => Local
            .from_local_datetime(value)
            .earliest()
            .map(|local| local.timestamp_millis())
            .ok_or_else(|| {
                OdmError::conversion("NaiveDateTime", "DateTime", format!("{value} does not exist in the local time zone"))
            }),
    }
}

fn naive_from_instant(instant: DateTime<Utc>, storage: DateStorage) -> NaiveDateTime {
    match storage {
        DateStorage::Utc => instant.naive_utc(),
        DateStorage::Local => instant.with_timezone(&Local).naive_local(),
    }
}

pub(crate) struct UtcDateTimeCodec;

impl TypedCodec for UtcDateTimeCodec {
    type Value = DateTime<Utc>;

    fn encode(&self, value: &DateTime<Utc>, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::DateTime(bson::DateTime::from_millis(value.timestamp_millis())))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<DateTime<Utc>> {
        instant_from_bson(value, "DateTime<Utc>")
    }
}

/// Zone-less date-times, interpreted through [`DateStorage`].
pub(crate) struct NaiveDateTimeCodec;

impl TypedCodec for NaiveDateTimeCodec {
    type Value = NaiveDateTime;

    fn encode(&self, value: &NaiveDateTime, ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        let millis = naive_to_millis(value, ctx.options.date_storage)?;
        Ok(Bson::DateTime(bson::DateTime::from_millis(millis)))
    }

    fn decode(&self, value: &Bson, ctx: &CodecContext<'_>) -> OdmResult<NaiveDateTime> {
        if let Bson::String(text) = value {
            if let Ok(parsed) = text.parse::<NaiveDateTime>() {
                return Ok(parsed);
            }
        }
        let instant = instant_from_bson(value, "NaiveDateTime")?;
        Ok(naive_from_instant(instant, ctx.options.date_storage))
    }
}

/// Dates are stored as midnight of that day.
pub(crate) struct NaiveDateCodec;

impl TypedCodec for NaiveDateCodec {
    type Value = NaiveDate;

    fn encode(&self, value: &NaiveDate, ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        NaiveDateTimeCodec.encode(&value.and_time(NaiveTime::MIN), ctx)
    }

    fn decode(&self, value: &Bson, ctx: &CodecContext<'_>) -> OdmResult<NaiveDate> {
        if let Bson::String(text) = value {
            if let Ok(parsed) = text.parse::<NaiveDate>() {
                return Ok(parsed);
            }
        }
        NaiveDateTimeCodec.decode(value, ctx).map(|value| value.date())
    }
}
