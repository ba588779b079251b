//! Ticketing surface: class definitions, carts, checkout, ticket ops.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::checkout::{self, IssueLine};
use crate::services::holds::{self, CartLine};
use crate::services::inventory::{self, TicketClassDefinition};
use crate::services::perms;
use crate::services::tickets as ticket_ops;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success, success_with_status};

use super::{load_club, load_showing, AppState, CurrentUser};

#[derive(Deserialize)]
pub struct DefineClassesBody {
    pub ticket_types: Vec<TicketClassDefinition>,
    pub drop_time: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct AvailabilityEntry {
    id: Uuid,
    name: String,
    price: Decimal,
    remaining: i32,
    quantity: i32,
    group_discount: Option<Decimal>,
    group_size: Option<i32>,
}

/// PUT /clubs/{code}/events/{eid}/showings/{sid}/tickets
pub async fn define_classes(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, event_id, showing_id)): Path<(String, Uuid, Uuid)>,
    axum::Json(body): axum::Json<DefineClassesBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    if !perms::can_manage_club(&state.pool, &user, &club).await? {
        return Err(AppError::Forbidden(
            "only officers may define ticket classes".into(),
        ));
    }
    let showing = load_showing(&state.pool, &club, event_id, showing_id).await?;

    let classes =
        inventory::define_classes(&state.pool, &showing, &body.ticket_types, body.drop_time)
            .await?;
    Ok(success(
        serde_json::json!({ "ticket_types": classes.len() }),
        "Ticket classes defined",
    ))
}

/// GET /clubs/{code}/events/{eid}/showings/{sid}/tickets
pub async fn get_availability(
    State(state): State<AppState>,
    Path((code, event_id, showing_id)): Path<(String, Uuid, Uuid)>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    let showing = load_showing(&state.pool, &club, event_id, showing_id).await?;

    let classes = inventory::get_availability(&state.pool, showing.id).await?;
    let entries: Vec<AvailabilityEntry> = classes
        .into_iter()
        .map(|c| AvailabilityEntry {
            id: c.id,
            name: c.name,
            price: c.price,
            remaining: c.remaining,
            quantity: c.quantity,
            group_discount: c.group_discount,
            group_size: c.group_size,
        })
        .collect();
    Ok(success(
        serde_json::json!({ "ticket_types": entries }),
        "Ticket availability",
    ))
}

#[derive(Deserialize)]
pub struct AddToCartBody {
    pub quantities: Vec<CartLine>,
}

/// POST /clubs/{code}/events/{eid}/showings/{sid}/add-to-cart
pub async fn add_to_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, event_id, showing_id)): Path<(String, Uuid, Uuid)>,
    axum::Json(body): axum::Json<AddToCartBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    let showing = load_showing(&state.pool, &club, event_id, showing_id).await?;

    let cart_id =
        holds::add_to_cart(&state.pool, &state.config, user.id, &showing, &body.quantities)
            .await?;
    Ok(success(
        serde_json::json!({ "cart_id": cart_id }),
        "Tickets held in cart",
    ))
}

#[derive(Deserialize)]
pub struct IssueTicketsBody {
    pub tickets: Vec<IssueLine>,
}

/// POST /clubs/{code}/events/{eid}/showings/{sid}/issue-tickets
///
/// All-or-nothing: a 400 lists every per-line problem and issues nothing.
pub async fn issue_tickets(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, event_id, showing_id)): Path<(String, Uuid, Uuid)>,
    axum::Json(body): axum::Json<IssueTicketsBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    if !perms::can_manage_club(&state.pool, &user, &club).await? {
        return Err(AppError::Forbidden("only officers may issue tickets".into()));
    }
    let showing = load_showing(&state.pool, &club, event_id, showing_id).await?;

    let ticket_ids = checkout::issue_tickets(&state.pool, showing.id, &body.tickets).await?;
    Ok(created(
        serde_json::json!({ "tickets": ticket_ids }),
        "Tickets issued",
    ))
}

/// POST /tickets/initiate-checkout
pub async fn initiate_checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let outcome = checkout::initiate_checkout(
        &state.pool,
        state.provider.as_ref(),
        state.dispatcher.as_ref(),
        user.id,
        &user.email,
    )
    .await?;

    match outcome {
        checkout::InitiateOutcome::SoldFreeTickets { ticket_ids } => Ok(success(
            serde_json::json!({ "sold_free_tickets": true, "tickets": ticket_ids }),
            "Free tickets issued",
        )),
        checkout::InitiateOutcome::CaptureContext { capture_context } => Ok(success(
            serde_json::json!({ "sold_free_tickets": false, "capture_context": capture_context }),
            "Checkout initiated",
        )),
    }
}

#[derive(Deserialize)]
pub struct CompleteCheckoutBody {
    pub transient_token: String,
}

/// POST /tickets/complete-checkout
pub async fn complete_checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    axum::Json(body): axum::Json<CompleteCheckoutBody>,
) -> Result<Response, AppError> {
    let summary = checkout::complete_checkout(
        &state.pool,
        state.provider.as_ref(),
        state.dispatcher.as_ref(),
        user.id,
        &body.transient_token,
    )
    .await?;

    let status = if summary.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok(success_with_status(summary, "Checkout complete", status))
}

/// GET /tickets/cart
pub async fn get_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let view = holds::get_cart(&state.pool, user.id).await?;
    Ok(success(view, "Cart contents"))
}

/// GET /tickets/
pub async fn list_tickets(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let tickets = ticket_ops::list_owned_tickets(&state.pool, user.id).await?;
    Ok(success(tickets, "Your tickets"))
}

/// GET /tickets/{id}
pub async fn get_ticket(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = ticket_ops::get_ticket(&state.pool, ticket_id).await?;
    if !ticket_ops::can_view_ticket(&state.pool, &user, &ticket).await? {
        return Err(AppError::NotFound(format!("ticket {ticket_id}")));
    }
    Ok(success(ticket, "Ticket"))
}

#[derive(Deserialize)]
pub struct TransferBody {
    pub username: String,
}

/// POST /tickets/{id}/transfer
pub async fn transfer_ticket(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(ticket_id): Path<Uuid>,
    axum::Json(body): axum::Json<TransferBody>,
) -> Result<Response, AppError> {
    ticket_ops::transfer_ticket(
        &state.pool,
        state.dispatcher.as_ref(),
        &user,
        ticket_id,
        &body.username,
    )
    .await?;
    Ok(empty_success("Ticket transferred"))
}

/// DELETE /tickets/{id}
pub async fn delete_ticket(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    ticket_ops::delete_ticket(&state.pool, &user, ticket_id).await?;
    Ok(empty_success("Ticket deleted"))
}

#[derive(Deserialize)]
pub struct PatchTicketBody {
    pub attended: bool,
}

/// PATCH /tickets/{id}
pub async fn patch_ticket(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(ticket_id): Path<Uuid>,
    axum::Json(body): axum::Json<PatchTicketBody>,
) -> Result<Response, AppError> {
    let ticket = ticket_ops::set_attended(&state.pool, &user, ticket_id, body.attended).await?;
    Ok(success(ticket, "Ticket updated"))
}
