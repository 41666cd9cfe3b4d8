//! User repository.
//!
//! One row per Telegram identity. Re-registration overwrites the profile and
//! refreshes the registration time; rows are only ever soft-deactivated.

use super::{from_db_time, to_db_time, StoreError};
use crate::registration::Tier;
use crate::telegram::traits::UserId;
use sqlx::{FromRow, SqlitePool};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone_number: String,
    pub name: String,
    pub tier: Tier,
    pub registered_at: u64,
    pub last_activity: u64,
    pub is_active: bool,
    pub channel_member: bool,
}

/// Profile produced by a completed registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone_number: String,
    pub name: String,
    pub tier: Tier,
}

/// Aggregate counts over active users.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub total: u64,
    pub channel_members: u64,
    /// Every tier, in display order, including empty ones
    pub by_tier: Vec<(Tier, u64)>,
}

impl UserStats {
    /// Percentage of active users that are channel members.
    pub fn membership_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.channel_members as f64 / self.total as f64 * 100.0
    }
}

#[derive(FromRow)]
struct UserRow {
    user_id: i64,
    username: Option<String>,
    first_name: String,
    last_name: Option<String>,
    phone_number: String,
    name: String,
    product_access: String,
    registered_at: i64,
    last_activity: i64,
    is_active: bool,
    channel_member: bool,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let tier = Tier::from_key(&row.product_access).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "user {} has unknown tier '{}'",
                row.user_id, row.product_access
            ))
        })?;

        Ok(UserRecord {
            user_id: UserId(row.user_id),
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            phone_number: row.phone_number,
            name: row.name,
            tier,
            registered_at: from_db_time(row.registered_at),
            last_activity: from_db_time(row.last_activity),
            is_active: row.is_active,
            channel_member: row.channel_member,
        })
    }
}

const USER_COLUMNS: &str = "user_id, username, first_name, last_name, phone_number, name, \
     product_access, registered_at, last_activity, is_active, channel_member";

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite the profile for `user.user_id`.
    ///
    /// Registration and activity times are set to `now` and the row is
    /// reactivated. The channel flag is left to the membership sync that runs
    /// right after registration.
    pub async fn upsert(&self, user: &NewUser, now: u64) -> Result<UserRecord, StoreError> {
        let now_db = to_db_time(now);

        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, first_name, last_name, phone_number, name,
                               product_access, registered_at, last_activity, is_active, channel_member)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0)
            ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                phone_number = excluded.phone_number,
                name = excluded.name,
                product_access = excluded.product_access,
                registered_at = excluded.registered_at,
                last_activity = excluded.last_activity,
                is_active = 1
            "#,
        )
        .bind(user.user_id.0)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(&user.name)
        .bind(user.tier.key())
        .bind(now_db)
        .bind(now_db)
        .execute(self.pool)
        .await?;

        self.get(user.user_id).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("user {} missing after upsert", user.user_id))
        })
    }

    /// Look up a user by identity.
    pub async fn get(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = ?"
        ))
        .bind(user_id.0)
        .fetch_optional(self.pool)
        .await?;

        row.map(UserRecord::try_from).transpose()
    }

    /// Record activity. Activity from a deactivated user reactivates it.
    ///
    /// Returns `false` if the user is not registered.
    pub async fn touch_activity(&self, user_id: UserId, now: u64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE users SET last_activity = ?, is_active = 1 WHERE user_id = ?")
                .bind(to_db_time(now))
                .bind(user_id.0)
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Store the channel membership flag. Returns `false` if the user is not registered.
    pub async fn set_channel_member(
        &self,
        user_id: UserId,
        is_member: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET channel_member = ? WHERE user_id = ?")
            .bind(is_member)
            .bind(user_id.0)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-deactivate a user. Returns `false` if it was not active.
    pub async fn deactivate(&self, user_id: UserId) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE users SET is_active = 0 WHERE user_id = ? AND is_active = 1")
                .bind(user_id.0)
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All active users, oldest registration first.
    pub async fn active_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 ORDER BY registered_at, user_id"
        ))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }

    /// Active users flagged as channel members.
    pub async fn channel_members(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE is_active = 1 AND channel_member = 1 ORDER BY registered_at, user_id"
        ))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }

    /// One page of active users (pages start at 1) and the total count.
    pub async fn page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<UserRecord>, u64), StoreError> {
        let page_size = page_size.max(1);
        let offset = i64::from(page.max(1) - 1) * i64::from(page_size);

        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 \
             ORDER BY registered_at, user_id LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(self.pool)
            .await?;

        let users = rows
            .into_iter()
            .map(UserRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((users, u64::try_from(total).unwrap_or_default()))
    }

    /// Totals over active users.
    pub async fn stats(&self) -> Result<UserStats, StoreError> {
        let (total, members): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(channel_member), 0) FROM users WHERE is_active = 1",
        )
        .fetch_one(self.pool)
        .await?;

        let tier_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT product_access, COUNT(*) FROM users WHERE is_active = 1 GROUP BY product_access",
        )
        .fetch_all(self.pool)
        .await?;

        let by_tier = Tier::ALL
            .iter()
            .map(|tier| {
                let count = tier_rows
                    .iter()
                    .find(|(key, _)| key == tier.key())
                    .map(|(_, count)| u64::try_from(*count).unwrap_or_default())
                    .unwrap_or(0);
                (*tier, count)
            })
            .collect();

        Ok(UserStats {
            total: u64::try_from(total).unwrap_or_default(),
            channel_members: u64::try_from(members).unwrap_or_default(),
            by_tier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn new_user(id: i64, name: &str, tier: Tier) -> NewUser {
        NewUser {
            user_id: UserId(id),
            username: Some(format!("user{id}")),
            first_name: name.to_string(),
            last_name: None,
            phone_number: format!("+{id}00"),
            name: name.to_string(),
            tier,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        let record = users.upsert(&new_user(1, "Ana", Tier::Vip), 100).await.unwrap();

        assert_eq!(record.user_id, UserId(1));
        assert_eq!(record.phone_number, "+100");
        assert_eq!(record.name, "Ana");
        assert_eq!(record.tier, Tier::Vip);
        assert_eq!(record.registered_at, 100);
        assert_eq!(record.last_activity, 100);
        assert!(record.is_active);
        assert!(!record.channel_member);

        assert_eq!(users.get(UserId(1)).await.unwrap(), Some(record));
        assert_eq!(users.get(UserId(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reregistration_overwrites_profile() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        users.upsert(&new_user(1, "Ana", Tier::Basic), 100).await.unwrap();
        users.set_channel_member(UserId(1), true).await.unwrap();
        users.deactivate(UserId(1)).await.unwrap();

        let mut again = new_user(1, "Ana Maria", Tier::Gold);
        again.phone_number = "+999".to_string();
        let record = users.upsert(&again, 500).await.unwrap();

        assert_eq!(record.name, "Ana Maria");
        assert_eq!(record.phone_number, "+999");
        assert_eq!(record.tier, Tier::Gold);
        assert_eq!(record.registered_at, 500);
        assert!(record.is_active);
        assert!(record.channel_member);
        assert_eq!(users.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_touch_activity_reactivates() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        assert!(!users.touch_activity(UserId(1), 10).await.unwrap());

        users.upsert(&new_user(1, "Ana", Tier::Basic), 100).await.unwrap();
        assert!(users.deactivate(UserId(1)).await.unwrap());
        assert!(!users.deactivate(UserId(1)).await.unwrap());

        assert!(users.touch_activity(UserId(1), 200).await.unwrap());
        let record = users.get(UserId(1)).await.unwrap().unwrap();
        assert!(record.is_active);
        assert_eq!(record.last_activity, 200);
        assert_eq!(record.registered_at, 100);
    }

    #[tokio::test]
    async fn test_audience_queries() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        for id in 1..=4 {
            users.upsert(&new_user(id, "User", Tier::Silver), 100 + id as u64).await.unwrap();
        }
        users.set_channel_member(UserId(1), true).await.unwrap();
        users.set_channel_member(UserId(2), true).await.unwrap();
        users.set_channel_member(UserId(3), true).await.unwrap();
        users.deactivate(UserId(3)).await.unwrap();

        let members: Vec<UserId> = users
            .channel_members()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        assert_eq!(members, vec![UserId(1), UserId(2)]);

        let active = users.active_users().await.unwrap();
        assert_eq!(active.len(), 3);
    }

    #[tokio::test]
    async fn test_pagination() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        for id in 1..=5 {
            users.upsert(&new_user(id, "User", Tier::Basic), id as u64).await.unwrap();
        }

        let (first, total) = users.page(1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.iter().map(|u| u.user_id.0).collect::<Vec<_>>(), vec![1, 2]);

        let (last, _) = users.page(3, 2).await.unwrap();
        assert_eq!(last.iter().map(|u| u.user_id.0).collect::<Vec<_>>(), vec![5]);

        let (beyond, _) = users.page(4, 2).await.unwrap();
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        assert_eq!(users.stats().await.unwrap().membership_rate(), 0.0);

        users.upsert(&new_user(1, "A", Tier::Vip), 1).await.unwrap();
        users.upsert(&new_user(2, "B", Tier::Vip), 1).await.unwrap();
        users.upsert(&new_user(3, "C", Tier::Basic), 1).await.unwrap();
        users.upsert(&new_user(4, "D", Tier::Gold), 1).await.unwrap();
        users.set_channel_member(UserId(1), true).await.unwrap();

        let stats = users.stats().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.channel_members, 1);
        assert_eq!(stats.membership_rate(), 25.0);
        assert_eq!(
            stats.by_tier,
            vec![
                (Tier::Basic, 1),
                (Tier::Silver, 0),
                (Tier::Gold, 1),
                (Tier::Vip, 2)
            ]
        );
    }
}
