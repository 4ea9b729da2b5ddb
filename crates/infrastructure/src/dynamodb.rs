use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::types::CancellationReason;
use aws_sdk_dynamodb::Client;
use shared::{AppError, Config};
use tracing::info;

/// テーブル名とクライアントの組
#[derive(Clone)]
pub struct DynamoDbClient {
    client: Client,
    table_name: String,
}

impl DynamoDbClient {
    pub async fn new(config: &Config) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&aws_config);
        if let Some(endpoint) = &config.dynamodb_endpoint {
            info!(endpoint = %endpoint, "DynamoDB エンドポイントを上書き");
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            table_name: config.dynamodb_table.clone(),
        }
    }

    /// 既存のクライアントから作成
    pub fn from_client(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

/// 1トランザクションで書き込めるアイテム数の上限
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// SDK エラーを AppError に変換
pub fn sdk_error<E, R>(operation: &str, error: SdkError<E, R>) -> AppError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    AppError::DynamoDb(format!("{operation}: {}", DisplayErrorContext(&error)))
}

/// トランザクションが条件チェックの失敗で取り消されたか
pub fn is_condition_failure(reasons: &[CancellationReason]) -> bool {
    reasons
        .iter()
        .any(|reason| reason.code() == Some("ConditionalCheckFailed"))
}

/// SDK のビルダーエラーを AppError に変換
pub fn build_error(error: aws_sdk_dynamodb::error::BuildError) -> AppError {
    AppError::Internal(format!("DynamoDB request build error: {error}"))
}
