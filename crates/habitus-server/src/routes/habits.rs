use axum::extract::{Query, State};
use axum::routing::{delete, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use devcollab_core::habits::Frequency;
use devcollab_core::ids::{HabitId, UserId};
use devcollab_store::habits::HabitRow;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::server::HabitusState;

pub fn router() -> Router<HabitusState> {
    Router::new()
        .route(
            "/habits/",
            post(create_habit)
                .get(list_habits)
                .put(update_habit)
                .delete(delete_habit),
        )
        .route("/habits/bulk/", delete(delete_all_habits))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateHabit {
    user_id: Option<UserId>,
    tag: String,
    max_quantity: i64,
    #[serde(default)]
    frequency: Frequency,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HabitUpdate {
    id: HabitId,
    tag: Option<String>,
    max_quantity: Option<i64>,
    frequency: Option<Frequency>,
    current_quantity: Option<i64>,
    done: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserParams {
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: HabitId,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// The owner named in a query must exist and be the caller.
fn owned_user(state: &HabitusState, auth: &AuthUser, user_id: &UserId) -> ApiResult<()> {
    state.users().get(user_id)?;
    auth.ensure_owner(user_id)
}

async fn create_habit(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Json(req): Json<CreateHabit>,
) -> ApiResult<Json<HabitRow>> {
    if let Some(user_id) = &req.user_id {
        auth.ensure_owner(user_id)?;
    }
    if req.tag.trim().is_empty() {
        return Err(ApiError::BadRequest("Habit tag is required".into()));
    }
    if req.max_quantity < 0 {
        return Err(ApiError::BadRequest("maxQuantity must not be negative".into()));
    }
    let habit = state
        .habits()
        .create(auth.id(), &req.tag, req.frequency, req.max_quantity)?;
    tracing::info!(habit_id = %habit.id, user_id = %auth.id(), "habit created");
    Ok(Json(habit))
}

/// Bring every habit's period up to date, then list them.
async fn list_habits(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Query(params): Query<UserParams>,
) -> ApiResult<Json<Vec<HabitRow>>> {
    owned_user(&state, &auth, &params.user_id)?;
    let repo = state.habits();
    let mut habits = repo.list_by_user(&params.user_id)?;
    let today = today();
    let changed: Vec<HabitRow> = habits
        .iter_mut()
        .filter_map(|h| h.progress.refresh(h.frequency, today).then(|| h.clone()))
        .collect();
    if !changed.is_empty() {
        repo.save_all(&changed)?;
        tracing::debug!(user_id = %params.user_id, refreshed = changed.len(), "habit periods refreshed");
    }
    Ok(Json(habits))
}

async fn update_habit(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Json(req): Json<HabitUpdate>,
) -> ApiResult<Json<HabitRow>> {
    let repo = state.habits();
    let mut habit = repo.get(&req.id)?;
    auth.ensure_owner(&habit.user_id)?;
    if let Some(tag) = req.tag {
        habit.tag = tag;
    }
    if let Some(frequency) = req.frequency {
        habit.frequency = frequency;
    }
    if let Some(max) = req.max_quantity {
        habit.progress.max_quantity = max;
    }
    if let Some(current) = req.current_quantity {
        habit.progress.current_quantity = current.max(0);
    }
    if let Some(done) = req.done {
        habit.progress.done = done;
        habit.progress.date_done = done.then(today);
    }
    habit.progress.refresh(habit.frequency, today());
    repo.save(&habit)?;
    Ok(Json(habit))
}

async fn delete_habit(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Query(params): Query<IdParams>,
) -> ApiResult<()> {
    let repo = state.habits();
    let habit = repo.get(&params.id)?;
    auth.ensure_owner(&habit.user_id)?;
    repo.delete(&habit.id)?;
    Ok(())
}

async fn delete_all_habits(
    State(state): State<HabitusState>,
    auth: AuthUser,
    Query(params): Query<UserParams>,
) -> ApiResult<()> {
    owned_user(&state, &auth, &params.user_id)?;
    let removed = state.habits().delete_all_by_user(&params.user_id)?;
    tracing::info!(user_id = %params.user_id, removed, "habits cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    use devcollab_core::ids::HabitId;
    use devcollab_store::habits::HabitRepo;

    use crate::server::test_support::TestServer;

    async fn create(server: &TestServer, token: &str, body: Value) -> reqwest::Response {
        server
            .client
            .post(server.url("/habits/"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn list(server: &TestServer, token: &str, user_id: &str) -> reqwest::Response {
        server
            .client
            .get(server.url(&format!("/habits/?userId={user_id}")))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_list_own_habits() {
        let server = TestServer::start().await;
        let (token, uid) = server.register("ana@example.com").await;

        let habit: Value = create(
            &server,
            &token,
            json!({"tag": "Read", "maxQuantity": 2, "frequency": "WEEKLY"}),
        )
        .await
        .json()
        .await
        .unwrap();
        assert_eq!(habit["currentQuantity"], 0);
        assert_eq!(habit["done"], false);
        assert_eq!(habit["frequency"], "WEEKLY");

        let habits: Value = list(&server, &token, &uid).await.json().await.unwrap();
        assert_eq!(habits.as_array().unwrap().len(), 1);

        assert_eq!(list(&server, &token, "user_missing").await.status(), 404);
    }

    #[tokio::test]
    async fn other_users_are_forbidden() {
        let server = TestServer::start().await;
        let (ana, ana_id) = server.register("ana@example.com").await;
        let (bob, _) = server.register("bob@example.com").await;

        let habit: Value = create(&server, &ana, json!({"tag": "Run", "maxQuantity": 1}))
            .await
            .json()
            .await
            .unwrap();

        assert_eq!(list(&server, &bob, &ana_id).await.status(), 403);
        let foreign = create(&server, &bob, json!({"userId": ana_id, "tag": "x", "maxQuantity": 1})).await;
        assert_eq!(foreign.status(), 403);

        let resp = server
            .client
            .delete(server.url(&format!("/habits/?id={}", habit["id"].as_str().unwrap())))
            .bearer_auth(&bob)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);

        let anonymous = server.client.get(server.url("/habits/?userId=x")).send().await.unwrap();
        assert_eq!(anonymous.status(), 401);
    }

    #[tokio::test]
    async fn update_reaching_goal_marks_done() {
        let server = TestServer::start().await;
        let (token, _) = server.register("ana@example.com").await;
        let habit: Value = create(&server, &token, json!({"tag": "Water", "maxQuantity": 3}))
            .await
            .json()
            .await
            .unwrap();

        let updated: Value = server
            .client
            .put(server.url("/habits/"))
            .bearer_auth(&token)
            .json(&json!({"id": habit["id"], "currentQuantity": 3}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["done"], true);
        assert_eq!(updated["dateDone"], Utc::now().date_naive().to_string());
    }

    #[tokio::test]
    async fn zero_goal_habit_lists_as_done() {
        let server = TestServer::start().await;
        let (token, uid) = server.register("ana@example.com").await;
        create(&server, &token, json!({"tag": "Rest day", "maxQuantity": 0})).await;

        let habits: Value = list(&server, &token, &uid).await.json().await.unwrap();
        assert_eq!(habits[0]["done"], true);
        assert_eq!(habits[0]["dateDone"], Utc::now().date_naive().to_string());
    }

    #[tokio::test]
    async fn listing_resets_elapsed_periods() {
        let server = TestServer::start().await;
        let (token, uid) = server.register("ana@example.com").await;
        let habit: Value = create(&server, &token, json!({"tag": "Stretch", "maxQuantity": 1}))
            .await
            .json()
            .await
            .unwrap();

        let repo = HabitRepo::new(server.db.clone());
        let mut row = repo.get(&HabitId::from_raw(habit["id"].as_str().unwrap())).unwrap();
        row.progress.current_quantity = 1;
        row.progress.done = true;
        row.progress.date_done = Some(Utc::now().date_naive() - Duration::days(2));
        repo.save(&row).unwrap();

        let habits: Value = list(&server, &token, &uid).await.json().await.unwrap();
        assert_eq!(habits[0]["done"], false);
        assert_eq!(habits[0]["currentQuantity"], 0);
        assert!(repo.get(&row.id).unwrap().progress.date_done.is_none());
    }

    #[tokio::test]
    async fn bulk_delete() {
        let server = TestServer::start().await;
        let (token, uid) = server.register("ana@example.com").await;
        for tag in ["a", "b"] {
            create(&server, &token, json!({"tag": tag, "maxQuantity": 1})).await;
        }
        let resp = server
            .client
            .delete(server.url(&format!("/habits/bulk/?userId={uid}")))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let habits: Value = list(&server, &token, &uid).await.json().await.unwrap();
        assert!(habits.as_array().unwrap().is_empty());
    }
}
