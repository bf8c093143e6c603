//! HTTP minter: `POST {base_url}/iots/{address}/mint-sign`.

use super::{split_signature, MintPayload, MintRequest, MintSigner, Minter};
use crate::error::IotError;
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use std::time::Duration;

pub struct MinterClient<S: MintSigner> {
    client: Client,
    base_url: String,
    signer: S,
}

impl<S: MintSigner> MinterClient<S> {
    pub fn new(base_url: impl Into<String>, signer: S) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        MinterClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/iots/{}/mint-sign", self.base_url, self.signer.address())
    }

    /// Signs a mint request and assembles the submission body.
    pub async fn payload(&self, nonce: u64, amount: u64) -> Result<MintPayload, IotError> {
        let request = MintRequest::new(self.signer.address(), amount, nonce);
        let signature = self.signer.sign_mint(&request).await?;
        Ok(MintPayload {
            request,
            signature: split_signature(&signature)?,
        })
    }
}

#[async_trait]
impl<S: MintSigner> Minter for MinterClient<S> {
    async fn post_mint_sign(&self, nonce: u64, amount: u64) -> Result<(), IotError> {
        let payload = self.payload(nonce, amount).await?;
        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IotError::Network(format!("mint-sign: {status} {body}")));
        }
        info!("Mint request accepted: {amount} Wh, nonce {nonce}");
        Ok(())
    }
}
