use super::HandshakeServer;
use crate::crypto::protection::RecordProtection;
use crate::protocol::state::{Ready, ServerReady};
use crate::protocol::transcript::Transcript;
use crate::selector::BundleSet;
use crate::sniffer::ClassificationPolicy;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marker type for a missing field in the builder.
///
/// 用于在构建器中标记缺失字段的类型。
pub struct Missing;

/// A builder for creating a `HandshakeServer`.
///
/// This builder ensures that the selected bundles and the record-protection
/// collaborator are provided before constructing the server.
///
/// 用于创建 `HandshakeServer` 的构建器。
///
/// 此构建器确保在构造服务器之前提供了所选证书包和记录保护组件。
pub struct HandshakeServerBuilder<Bundles, Protection> {
    bundles: Bundles,
    record_protection: Protection,
    policy: ClassificationPolicy,
}

impl HandshakeServerBuilder<Missing, Missing> {
    /// Creates a new `HandshakeServerBuilder`.
    pub fn new() -> Self {
        Self {
            bundles: Missing,
            record_protection: Missing,
            policy: ClassificationPolicy::default(),
        }
    }
}

impl Default for HandshakeServerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, P> HandshakeServerBuilder<B, P> {
    /// Sets the bundle set picked by the selector for this connection.
    ///
    /// 设置选择器为此连接挑选的证书包集合。
    pub fn bundles(self, bundles: BundleSet) -> HandshakeServerBuilder<BundleSet, P> {
        HandshakeServerBuilder {
            bundles,
            record_protection: self.record_protection,
            policy: self.policy,
        }
    }

    /// Sets the factory for record protectors.
    ///
    /// 设置记录保护器工厂。
    pub fn record_protection(
        self,
        protection: Arc<dyn RecordProtection>,
    ) -> HandshakeServerBuilder<B, Arc<dyn RecordProtection>> {
        HandshakeServerBuilder {
            bundles: self.bundles,
            record_protection: protection,
            policy: self.policy,
        }
    }

    /// Sets the tie-break policy the sniffer used, so the parsed ClientHello
    /// is judged the same way.
    ///
    /// 设置嗅探器使用的判定策略，使解析后的 ClientHello 以相同方式判定。
    pub fn policy(mut self, policy: ClassificationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl HandshakeServerBuilder<BundleSet, Arc<dyn RecordProtection>> {
    /// Builds the `HandshakeServer`.
    ///
    /// This method is only available when all required fields have been provided.
    ///
    /// 构建 `HandshakeServer`。
    ///
    /// 此方法仅在提供了所有必需字段时可用。
    pub fn build(self) -> HandshakeServer<Ready, ServerReady> {
        HandshakeServer {
            state: PhantomData,
            state_data: ServerReady {},
            bundles: self.bundles,
            policy: self.policy,
            record_protection: self.record_protection,
            transcript: Transcript::new(),
        }
    }
}
