use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TwoFactorCredential;

#[derive(Clone)]
pub struct TwoFactorCredentialRepository {
    pool: PgPool,
}

impl TwoFactorCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// ユーザーIDで2FAクレデンシャルを検索
    pub async fn find_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TwoFactorCredential>, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorCredential>(
            r#"
            SELECT user_id, secret_encrypted, backup_codes, created_at, updated_at
            FROM two_factor_credentials
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// 新しい2FAクレデンシャルを作成
    ///
    /// # Note
    /// シークレットは作成後不変。バックアップコードは有効化時に一度だけ
    /// 生成される
    pub async fn create(
        &self,
        user_id: Uuid,
        secret_encrypted: &[u8],
        backup_codes: &[String],
    ) -> Result<TwoFactorCredential, sqlx::Error> {
        sqlx::query_as::<_, TwoFactorCredential>(
            r#"
            INSERT INTO two_factor_credentials (user_id, secret_encrypted, backup_codes)
            VALUES ($1, $2, $3)
            RETURNING user_id, secret_encrypted, backup_codes, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(secret_encrypted)
        .bind(backup_codes)
        .fetch_one(&self.pool)
        .await
    }

    /// バックアップコードを1件消費する（正規化済みコードで完全一致）
    ///
    /// 照合と削除を単一のUPDATE文で行うため、途中状態が観測されることはない。
    /// 同じコードによる並行リクエストはどちらか一方だけが成功する。
    ///
    /// # Returns
    /// コードが存在し削除された場合 true
    pub async fn consume_backup_code(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE two_factor_credentials
            SET backup_codes = array_remove(backup_codes, $2), updated_at = NOW()
            WHERE user_id = $1 AND $2 = ANY(backup_codes)
            "#,
        )
        .bind(user_id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// バックアップコード一式を差し替える（有効化時に一度だけ呼ばれる）
    pub async fn set_backup_codes(
        &self,
        user_id: Uuid,
        backup_codes: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE two_factor_credentials
            SET backup_codes = $2, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(backup_codes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 2FAクレデンシャルを削除（2FA無効化時）
    pub async fn delete(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM two_factor_credentials
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn insert_user(pool: &PgPool) -> Uuid {
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO users (email) VALUES ('2fa-repo-test@example.com') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn test_consume_backup_code_single_use(pool: PgPool) {
        let repo = TwoFactorCredentialRepository::new(pool.clone());
        let user_id = insert_user(&pool).await;

        let codes = vec![
            "AB12CD34".to_string(),
            "EF56GH78".to_string(),
            "JK9MNP23".to_string(),
        ];
        repo.create(user_id, b"encrypted-secret", &codes)
            .await
            .unwrap();

        // 1回目は成功し、コードが1件減る
        assert!(repo.consume_backup_code(user_id, "AB12CD34").await.unwrap());
        let credential = repo.find_by_user_id(user_id).await.unwrap().unwrap();
        assert_eq!(credential.backup_codes.len(), 2);
        assert!(!credential.backup_codes.contains(&"AB12CD34".to_string()));

        // 同じコードの2回目は失敗し、これ以上減らない
        assert!(!repo.consume_backup_code(user_id, "AB12CD34").await.unwrap());
        let credential = repo.find_by_user_id(user_id).await.unwrap().unwrap();
        assert_eq!(credential.backup_codes.len(), 2);
    }

    #[sqlx::test]
    async fn test_consume_unknown_code_rejected(pool: PgPool) {
        let repo = TwoFactorCredentialRepository::new(pool.clone());
        let user_id = insert_user(&pool).await;

        repo.create(user_id, b"encrypted-secret", &["AB12CD34".to_string()])
            .await
            .unwrap();

        assert!(!repo.consume_backup_code(user_id, "ZZ99ZZ99").await.unwrap());
    }

    #[sqlx::test]
    async fn test_set_backup_codes_replaces(pool: PgPool) {
        let repo = TwoFactorCredentialRepository::new(pool.clone());
        let user_id = insert_user(&pool).await;

        repo.create(user_id, b"encrypted-secret", &[]).await.unwrap();
        repo.set_backup_codes(user_id, &["AB12CD34".to_string(), "EF56GH78".to_string()])
            .await
            .unwrap();

        let credential = repo.find_by_user_id(user_id).await.unwrap().unwrap();
        assert_eq!(credential.backup_codes.len(), 2);
    }
}
