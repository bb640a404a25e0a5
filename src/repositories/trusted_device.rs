use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TrustedDevice;

#[derive(Clone)]
pub struct TrustedDeviceRepository {
    pool: PgPool,
}

impl TrustedDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// (user_id, device_id) で信頼済みデバイスを検索
    ///
    /// アクセス判定に使ってよいのはこのメソッドだけ。
    /// device_id 単独の照合はユーザー間のフィンガープリント衝突で
    /// 誤った信頼を与えうる
    pub async fn find(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<TrustedDevice>, sqlx::Error> {
        sqlx::query_as::<_, TrustedDevice>(
            r#"
            SELECT user_id, device_id, device_name, user_agent, ip_address,
                   created_at, last_used
            FROM trusted_devices
            WHERE user_id = $1 AND device_id = $2
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// device_id 単独で検索（デバッグ用）
    ///
    /// # Note
    /// 管理者向けデバッグエンドポイント専用。呼び出し側は結果の
    /// user_id を必ず確認すること。アクセス判定への使用禁止
    pub async fn find_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<TrustedDevice>, sqlx::Error> {
        sqlx::query_as::<_, TrustedDevice>(
            r#"
            SELECT user_id, device_id, device_name, user_agent, ip_address,
                   created_at, last_used
            FROM trusted_devices
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// ユーザーの信頼済みデバイス一覧（last_used 降順）
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, sqlx::Error> {
        sqlx::query_as::<_, TrustedDevice>(
            r#"
            SELECT user_id, device_id, device_name, user_agent, ip_address,
                   created_at, last_used
            FROM trusted_devices
            WHERE user_id = $1
            ORDER BY last_used DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// 信頼済みデバイスを登録または更新
    ///
    /// 既存の device_id があればメタデータと last_used を更新する
    /// （動的IPなどでメタデータが変わっても信頼は失われない）。
    /// 同一 (user_id, device_id) での再実行は冪等
    pub async fn upsert(
        &self,
        user_id: Uuid,
        device_id: &str,
        device_name: &str,
        user_agent: &str,
        ip_address: Option<&str>,
    ) -> Result<TrustedDevice, sqlx::Error> {
        sqlx::query_as::<_, TrustedDevice>(
            r#"
            INSERT INTO trusted_devices (user_id, device_id, device_name, user_agent, ip_address)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (device_id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                device_name = EXCLUDED.device_name,
                user_agent = EXCLUDED.user_agent,
                ip_address = EXCLUDED.ip_address,
                last_used = NOW()
            RETURNING user_id, device_id, device_name, user_agent, ip_address,
                      created_at, last_used
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(device_name)
        .bind(user_agent)
        .bind(ip_address)
        .fetch_one(&self.pool)
        .await
    }

    /// last_used を現在時刻に更新
    ///
    /// ゲートが信頼済みデバイス経路を通った際の副作用として呼ばれる
    pub async fn touch(&self, user_id: Uuid, device_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE trusted_devices
            SET last_used = NOW()
            WHERE user_id = $1 AND device_id = $2
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 信頼済みデバイスを削除
    pub async fn remove(&self, user_id: Uuid, device_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM trusted_devices
            WHERE user_id = $1 AND device_id = $2
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// ユーザーの信頼済みデバイスを全削除
    ///
    /// # Note
    /// 2FA無効化と同一の論理操作として同期的に呼び出すこと。
    /// 失敗は呼び出し側へエラーとして伝播させる（黙殺禁止 -
    /// 無効化後に信頼が残るのはセキュリティ退行）
    pub async fn remove_all(&self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM trusted_devices
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_user(pool: &PgPool, email: &str) -> Uuid {
        sqlx::query_scalar::<_, Uuid>("INSERT INTO users (email) VALUES ($1) RETURNING id")
            .bind(email)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_upsert_idempotent_keeps_latest_metadata(pool: PgPool) {
        let repo = TrustedDeviceRepository::new(pool.clone());
        let user_id = insert_user(&pool, "device-test@example.com").await;

        repo.upsert(user_id, "device-a", "Chrome", "ua", Some("203.0.113.7"))
            .await
            .unwrap();
        // 同一 (user_id, device_id) でIPだけ変えて再実行
        let updated = repo
            .upsert(user_id, "device-a", "Chrome", "ua", Some("203.0.113.8"))
            .await
            .unwrap();

        // 行は1件のまま、最新のIPが残る
        assert_eq!(updated.ip_address.as_deref(), Some("203.0.113.8"));
        let devices = repo.list_by_user(user_id).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip_address.as_deref(), Some("203.0.113.8"));
    }

    #[sqlx::test]
    async fn test_remove_all_revokes_every_device(pool: PgPool) {
        let repo = TrustedDeviceRepository::new(pool.clone());
        let user_id = insert_user(&pool, "revoke-test@example.com").await;

        repo.upsert(user_id, "device-a", "Chrome", "ua", None)
            .await
            .unwrap();
        repo.upsert(user_id, "device-b", "Firefox", "ua2", None)
            .await
            .unwrap();

        let revoked = repo.remove_all(user_id).await.unwrap();
        assert_eq!(revoked, 2);

        // 全デバイスの信頼が消えている
        assert!(repo.find(user_id, "device-a").await.unwrap().is_none());
        assert!(repo.find(user_id, "device-b").await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_find_scoped_by_user(pool: PgPool) {
        let repo = TrustedDeviceRepository::new(pool.clone());
        let user_a = insert_user(&pool, "user-a@example.com").await;
        let user_b = insert_user(&pool, "user-b@example.com").await;

        repo.upsert(user_a, "shared-device", "Chrome", "ua", None)
            .await
            .unwrap();

        // 他ユーザーの device_id では見つからない
        assert!(repo.find(user_a, "shared-device").await.unwrap().is_some());
        assert!(repo.find(user_b, "shared-device").await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_remove_reports_miss(pool: PgPool) {
        let repo = TrustedDeviceRepository::new(pool.clone());
        let user_id = insert_user(&pool, "remove-test@example.com").await;

        assert!(!repo.remove(user_id, "no-such-device").await.unwrap());
    }
}
