use super::HandshakeServer;
use crate::crypto::keys::{PRE_MASTER_SECRET_LEN, derive_key_block, derive_master_secret};
use crate::error::{HandshakeError, Result};
use crate::protocol::message::HandshakeMessage;
use crate::protocol::state::{
    AwaitingFinished, AwaitingKeyExchange, Phase, ServerAwaitingFinished,
    ServerAwaitingKeyExchange,
};
use crate::selector::{BundleSet, SelectedCertificates};
use zeroize::Zeroizing;

impl HandshakeServer<AwaitingKeyExchange, ServerAwaitingKeyExchange> {
    pub fn phase(&self) -> Phase {
        Phase::AwaitingClientKeyExchange
    }

    /// Processes the ClientKeyExchange: recovers the pre-master secret, derives
    /// the master secret and key block, and installs the record protectors.
    ///
    /// 处理 ClientKeyExchange：恢复预主密钥，派生主密钥和密钥块，并安装记录保护器。
    pub fn process_client_key_exchange(
        mut self,
        message: &[u8],
    ) -> Result<HandshakeServer<AwaitingFinished, ServerAwaitingFinished>> {
        let exchange = match HandshakeMessage::decode(message)? {
            HandshakeMessage::ClientKeyExchange(exchange) => exchange,
            _ => return Err(HandshakeError::UnexpectedMessage),
        };
        self.transcript.update(message);

        let negotiated = self.state_data.negotiated;
        let pre_master_secret =
            recover_pre_master_secret(&self.bundles, &exchange.encrypted_pre_master_secret)?;
        if pre_master_secret.len() != PRE_MASTER_SECRET_LEN {
            return Err(HandshakeError::CryptoVerificationFailure(
                "pre-master secret has the wrong length",
            ));
        }
        if pre_master_secret[..2] != negotiated.client_version.0.to_be_bytes() {
            return Err(HandshakeError::CryptoVerificationFailure(
                "pre-master secret does not echo the client version",
            ));
        }

        let master_secret = derive_master_secret(
            negotiated.suite,
            &pre_master_secret,
            &negotiated.client_random,
            &negotiated.server_random,
        )?;
        let key_block = derive_key_block(
            negotiated.suite,
            &master_secret,
            &negotiated.client_random,
            &negotiated.server_random,
        )?;
        let client_protector = self
            .record_protection
            .protector(negotiated.suite, &key_block.client_write)?;
        let server_protector = self
            .record_protection
            .protector(negotiated.suite, &key_block.server_write)?;

        Ok(self.transition(ServerAwaitingFinished {
            negotiated,
            master_secret,
            client_protector,
            server_protector,
            client_cipher_active: false,
        }))
    }
}

/// Decrypts the pre-master secret with the key-transport key of the family.
///
/// For the GM family a ciphertext that only the signing key can open means the
/// client encrypted to the wrong certificate; that is reported as a role
/// mismatch rather than a generic decryption failure. The signing key's
/// plaintext is discarded either way.
///
/// 使用协议族的密钥传输私钥解密预主密钥。对于国密协议族，如果只有签名私钥
/// 能解开密文，说明客户端使用了错误的证书加密，此时报告为角色不匹配。
fn recover_pre_master_secret(
    bundles: &BundleSet,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    match bundles.certificates() {
        SelectedCertificates::Standard(set) => {
            set.authentication().decrypt(ciphertext).map_err(|_| {
                HandshakeError::CryptoVerificationFailure("pre-master secret decryption")
            })
        }
        SelectedCertificates::NationalCrypto(set) => {
            match set.key_transport().decrypt(ciphertext) {
                Ok(secret) => Ok(secret),
                Err(_) if set.authentication().decrypt(ciphertext).is_ok() => {
                    Err(HandshakeError::CertificateRoleMismatch(
                        "pre-master secret was encrypted to the signing certificate",
                    ))
                }
                Err(_) => Err(HandshakeError::CryptoVerificationFailure(
                    "pre-master secret decryption",
                )),
            }
        }
    }
}
