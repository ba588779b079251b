//! Authorization predicates.
//!
//! Officer authority flows down the parent-org graph: an officer of any
//! ancestor org can manage a child club. The graph is user-editable, so the
//! walk never assumes it is acyclic.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::club::Club;
use crate::models::membership::{Membership, User, ROLE_OFFICER};
use crate::utils::error::AppError;

/// Parent edges of the org graph, keyed by club code.
#[async_trait]
pub trait OrgEdges {
    async fn parent_codes(&self, code: &str) -> Result<Vec<String>, AppError>;
}

pub struct PgOrgEdges<'a> {
    pub pool: &'a PgPool,
}

#[async_trait]
impl OrgEdges for PgOrgEdges<'_> {
    async fn parent_codes(&self, code: &str) -> Result<Vec<String>, AppError> {
        let codes: Vec<(String,)> = sqlx::query_as(
            "SELECT p.code FROM clubs p \
             JOIN club_parents cp ON cp.parent_id = p.id \
             JOIN clubs c ON c.id = cp.child_id \
             WHERE c.code = $1",
        )
        .bind(code)
        .fetch_all(self.pool)
        .await?;
        Ok(codes.into_iter().map(|(c,)| c).collect())
    }
}

/// Breadth-first walk from `start`, inclusive. A visited set on club code
/// short-circuits cycles.
pub async fn ancestor_codes<E: OrgEdges>(
    edges: &E,
    start: &str,
) -> Result<Vec<String>, AppError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::new();

    visited.insert(start.to_string());
    queue.push_back(start.to_string());

    while let Some(code) = queue.pop_front() {
        order.push(code.clone());
        for parent in edges.parent_codes(&code).await? {
            if visited.insert(parent.clone()) {
                queue.push_back(parent);
            }
        }
    }

    Ok(order)
}

pub async fn get_membership(
    pool: &PgPool,
    user_id: Uuid,
    club_id: Uuid,
) -> Result<Option<Membership>, AppError> {
    let membership = sqlx::query_as::<_, Membership>(
        "SELECT * FROM memberships WHERE user_id = $1 AND club_id = $2",
    )
    .bind(user_id)
    .bind(club_id)
    .fetch_optional(pool)
    .await?;
    Ok(membership)
}

/// Officer (or better) of the club itself or of any ancestor org.
pub async fn is_officer_of_club_or_ancestor(
    pool: &PgPool,
    user_id: Uuid,
    club: &Club,
) -> Result<bool, AppError> {
    let edges = PgOrgEdges { pool };
    for code in ancestor_codes(&edges, &club.code).await? {
        let found: Option<(i32,)> = sqlx::query_as(
            "SELECT m.role FROM memberships m \
             JOIN clubs c ON c.id = m.club_id \
             WHERE m.user_id = $1 AND c.code = $2 AND m.active AND m.role <= $3",
        )
        .bind(user_id)
        .bind(&code)
        .bind(ROLE_OFFICER)
        .fetch_optional(pool)
        .await?;
        if found.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

pub async fn can_manage_club(pool: &PgPool, user: &User, club: &Club) -> Result<bool, AppError> {
    if user.is_superuser {
        return Ok(true);
    }
    is_officer_of_club_or_ancestor(pool, user.id, club).await
}

pub fn can_approve_clubs(user: &User) -> bool {
    user.is_superuser || user.can_approve_clubs
}

/// Whether a viewer sees the live club row rather than the ghost snapshot.
pub async fn sees_current_row(
    pool: &PgPool,
    user: Option<&User>,
    club: &Club,
) -> Result<bool, AppError> {
    let Some(user) = user else {
        return Ok(false);
    };
    if user.is_superuser || user.can_see_pending_clubs {
        return Ok(true);
    }
    Ok(get_membership(pool, user.id, club.id).await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEdges(HashMap<&'static str, Vec<&'static str>>);

    #[async_trait]
    impl OrgEdges for MapEdges {
        async fn parent_codes(&self, code: &str) -> Result<Vec<String>, AppError> {
            Ok(self
                .0
                .get(code)
                .map(|v| v.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn walks_to_all_ancestors() {
        let edges = MapEdges(HashMap::from([
            ("chess", vec!["games-umbrella"]),
            ("games-umbrella", vec!["student-council"]),
        ]));
        let order = ancestor_codes(&edges, "chess").await.unwrap();
        assert_eq!(order, vec!["chess", "games-umbrella", "student-council"]);
    }

    #[tokio::test]
    async fn survives_cycles() {
        let edges = MapEdges(HashMap::from([
            ("a", vec!["b"]),
            ("b", vec!["c"]),
            ("c", vec!["a"]),
        ]));
        let order = ancestor_codes(&edges, "a").await.unwrap();
        assert_eq!(order.len(), 3);
    }

    #[tokio::test]
    async fn handles_diamond_without_duplicates() {
        let edges = MapEdges(HashMap::from([
            ("leaf", vec!["left", "right"]),
            ("left", vec!["root"]),
            ("right", vec!["root"]),
        ]));
        let order = ancestor_codes(&edges, "leaf").await.unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order.iter().filter(|c| *c == "root").count(), 1);
    }
}
