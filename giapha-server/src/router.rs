use giapha_core::ipc::{GiaphaRequest, GiaphaResponse};
use giapha_core::{BranchKey, ChildDraft, GraphStore, StoreError};
use serde::Serialize;
use sqlx::PgPool;

pub async fn handle_request(request: GiaphaRequest, store: &GraphStore) -> GiaphaResponse {
    handle_request_with_pool(request, store, None).await
}

/// Handle request; `pool` adds database details to health reports.
pub async fn handle_request_with_pool(
    request: GiaphaRequest,
    store: &GraphStore,
    pool: Option<&PgPool>,
) -> GiaphaResponse {
    match request {
        GiaphaRequest::Ping => GiaphaResponse::pong(),
        GiaphaRequest::Health => health_report(store, pool).await,
        GiaphaRequest::Branches => GiaphaResponse::ok(serde_json::json!({
            "current": store.current_branch(),
            "branches": store.branches(),
            "statuses": store.branch_statuses(),
        })),
        GiaphaRequest::SelectBranch { branch } => {
            let key = BranchKey::new(branch);
            match store.select_branch(&key).await {
                Ok(()) => GiaphaResponse::ok(serde_json::json!({
                    "current": key,
                    "records": store.all_people().len(),
                    "degraded": store.is_degraded(),
                })),
                Err(e) => GiaphaResponse::from_store_error(&e),
            }
        }
        GiaphaRequest::People { merged } => {
            let people = if merged {
                store.merged_people()
            } else {
                store.all_people()
            };
            GiaphaResponse::ok(serde_json::json!({
                "branch": store.current_branch(),
                "merged": merged,
                "count": people.len(),
                "people": people.people(),
            }))
        }
        GiaphaRequest::Get { id } => match store.person_by_id(&id) {
            Some(person) => to_response(&person),
            None => GiaphaResponse::from_store_error(&StoreError::NotFound(id)),
        },
        GiaphaRequest::Relations { id } => match store.relatives(&id) {
            Some(relatives) => to_response(&relatives),
            None => GiaphaResponse::from_store_error(&StoreError::NotFound(id)),
        },
        GiaphaRequest::Search { query, limit } => {
            let mut results = store.search_people(&query);
            let total = results.len();
            if let Some(limit) = limit {
                results.truncate(limit);
            }
            GiaphaResponse::ok(serde_json::json!({
                "query": query,
                "total": total,
                "results": results,
            }))
        }
        GiaphaRequest::Save { person } => store_response(store.save(person).await),
        GiaphaRequest::AddPerson { person } => store_response(store.add_person(person).await),
        GiaphaRequest::AddChild {
            parent_id,
            name,
            position,
        } => store_response(
            store
                .add_child(&parent_id, ChildDraft { name, position })
                .await,
        ),
        GiaphaRequest::CheckIn { id, image, date } => {
            store_response(store.record_check_in(&id, image, date).await)
        }
        GiaphaRequest::ClearFields { id, fields } => {
            store_response(store.clear_fields(&id, &fields).await)
        }
        GiaphaRequest::Delete { id } => match store.delete_person(&id).await {
            Ok(deleted) => GiaphaResponse::ok(serde_json::json!({"id": id, "deleted": deleted})),
            Err(e) => GiaphaResponse::from_store_error(&e),
        },
        GiaphaRequest::Cleanup { name } => {
            let result = match &name {
                Some(name) => store.cleanup_duplicates_by_name(name).await,
                None => store.cleanup_wrong_branch().await,
            };
            match result {
                Ok(removed) => GiaphaResponse::ok(serde_json::json!({
                    "mode": if name.is_some() { "duplicates_by_name" } else { "wrong_branch" },
                    "removed": removed,
                })),
                Err(e) => GiaphaResponse::from_store_error(&e),
            }
        }
    }
}

async fn health_report(store: &GraphStore, pool: Option<&PgPool>) -> GiaphaResponse {
    let statuses = store.branch_statuses();
    let degraded = store.is_degraded() || statuses.iter().any(|s| s.degraded);
    let mut report = serde_json::json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "backend": store.backend(),
        "current_branch": store.current_branch(),
        "branches": statuses,
    });

    if let Some(pool) = pool {
        let pg_ver = match giapha_core::db::health_check(pool).await {
            Ok(v) => v,
            Err(e) => return GiaphaResponse::err(format!("DB health check failed: {}", e)),
        };
        report["postgresql"] = serde_json::json!(pg_ver);
        match giapha_core::db::branch_counts(pool).await {
            Ok(counts) => {
                report["partitions"] = counts
                    .into_iter()
                    .map(|(branch, records)| (branch, serde_json::json!(records)))
                    .collect::<serde_json::Map<_, _>>()
                    .into();
            }
            Err(e) => tracing::warn!(error = %e, "Partition count query failed"),
        }
    }
    GiaphaResponse::ok(report)
}

fn to_response<T: Serialize>(value: &T) -> GiaphaResponse {
    match serde_json::to_value(value) {
        Ok(data) => GiaphaResponse::ok(data),
        Err(e) => GiaphaResponse::err(format!("Serialization error: {}", e)),
    }
}

fn store_response<T: Serialize>(result: Result<T, StoreError>) -> GiaphaResponse {
    match result {
        Ok(value) => to_response(&value),
        Err(e) => GiaphaResponse::from_store_error(&e),
    }
}
