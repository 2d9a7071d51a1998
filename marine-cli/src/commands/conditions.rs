use crate::models::context::Context;
use chrono::NaiveDate;
use marine_fetch::FetchError;
use serde_json::Value;

pub async fn marine(
    ctx: &Context,
    lat: f64,
    lon: f64,
    date: Option<NaiveDate>,
) -> Result<Value, FetchError> {
    ctx.marine_client().marine(lat, lon, date).await
}

pub async fn forecast(
    ctx: &Context,
    lat: f64,
    lon: f64,
    model: &str,
    date: Option<NaiveDate>,
) -> Result<Value, FetchError> {
    ctx.marine_client().forecast(lat, lon, model, date).await
}

pub async fn current(ctx: &Context, lat: f64, lon: f64) -> Result<Value, FetchError> {
    ctx.marine_client().current(lat, lon).await
}

pub async fn geocode(ctx: &Context, name: &str) -> Result<Value, FetchError> {
    ctx.marine_client().geocode(name).await
}
