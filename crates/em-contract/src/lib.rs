//! Typed binding to the deployed NFT contract.

pub mod abi;
pub mod events;
pub mod handle;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use abi::{AbiDescriptor, AbiError, AbiItem};
pub use events::MintedSubscription;
pub use handle::{
    ContractHandle, ContractMethods, DEFAULT_POLL_INTERVAL, PendingTransaction, Receipt,
};

/// Address of the deployed collection.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x65813c8B5a99dECA557B6A08749B6Cd78C0a4cF6";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FAKE_ACCOUNT, FAKE_CONTRACT, FakeChain};
    use em_api_types::{WalletAddress, WorkflowError};
    use std::sync::Arc;
    use std::time::Duration;

    fn bind(chain: &Arc<FakeChain>, from: Option<&str>) -> anyhow::Result<ContractHandle> {
        let abi = Arc::new(AbiDescriptor::bundled()?);
        let handle = ContractHandle::bind(
            FAKE_CONTRACT,
            abi,
            ContractMethods::default(),
            chain.clone(),
            from.map(|addr| WalletAddress(addr.to_owned())),
        )?;
        Ok(handle.with_poll_interval(Duration::from_millis(5)))
    }

    #[tokio::test]
    async fn binding_is_idempotent() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        assert_eq!(bind(&chain, Some(FAKE_ACCOUNT))?, bind(&chain, Some(FAKE_ACCOUNT))?);
        assert_ne!(bind(&chain, Some(FAKE_ACCOUNT))?, bind(&chain, None)?);
        Ok(())
    }

    #[tokio::test]
    async fn binding_rejects_unknown_methods() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        let methods = ContractMethods {
            mint: "makeAnEpicNFT".to_owned(),
            ..ContractMethods::default()
        };
        let result = ContractHandle::bind(
            FAKE_CONTRACT,
            Arc::new(AbiDescriptor::bundled()?),
            methods,
            chain,
            None,
        );
        assert!(matches!(result, Err(AbiError::MissingFunction(name)) if name == "makeAnEpicNFT"));
        Ok(())
    }

    #[test]
    fn fake_chain_refuses_members_missing_from_abi() -> anyhow::Result<()> {
        let methods = ContractMethods {
            total_minted: "getTotalNFTsMintedSoFar".to_owned(),
            ..ContractMethods::default()
        };
        let result = FakeChain::with_abi(&AbiDescriptor::bundled()?, &methods);
        assert!(matches!(
            result,
            Err(AbiError::MissingFunction(name)) if name == "getTotalNFTsMintedSoFar"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn count_reads_without_signer() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new().with_minted(7));
        let handle = bind(&chain, None)?;
        assert_eq!(handle.get_total_minted_so_far().await?, 7);
        Ok(())
    }

    #[tokio::test]
    async fn mint_requires_signer() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        let handle = bind(&chain, None)?;
        assert!(matches!(handle.mint().await, Err(WorkflowError::NotConnected)));
        assert_eq!(chain.sent_transactions(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn mint_confirms_and_reports_event() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new().with_minted(3));
        let handle = bind(&chain, Some(FAKE_ACCOUNT))?;

        let pending = handle.mint().await?;
        let receipt = pending.await_confirmation().await?;
        assert!(receipt.success);
        assert_eq!(handle.get_total_minted_so_far().await?, 4);

        let events = handle.minted_events(&receipt);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token_id, 3);
        assert_eq!(events[0].from.0, FAKE_ACCOUNT);
        Ok(())
    }

    #[tokio::test]
    async fn confirmation_waits_for_mining() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        chain.set_auto_mine(false);
        let handle = bind(&chain, Some(FAKE_ACCOUNT))?;

        let pending = handle.mint().await?;
        let waiter = tokio::spawn(pending.await_confirmation());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        chain.mine_pending();
        let receipt = waiter.await??;
        assert!(receipt.success);
        Ok(())
    }

    #[tokio::test]
    async fn declined_signature_is_user_rejected() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        chain.reject_next_signature();
        let handle = bind(&chain, Some(FAKE_ACCOUNT))?;

        assert!(matches!(handle.mint().await, Err(WorkflowError::UserRejected(_))));
        assert_eq!(chain.minted(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reverted_transaction_is_chain_error() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        chain.revert_next();
        let handle = bind(&chain, Some(FAKE_ACCOUNT))?;

        let pending = handle.mint().await?;
        let result = pending.await_confirmation().await;
        assert!(matches!(result, Err(WorkflowError::Chain(_))));
        assert_eq!(chain.minted(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn subscription_delivers_later_mints_and_stops_on_drop() -> anyhow::Result<()> {
        let chain = Arc::new(FakeChain::new());
        chain.external_mint(FAKE_ACCOUNT);
        let handle = bind(&chain, Some(FAKE_ACCOUNT))?;

        let mut subscription = handle.subscribe_minted().await?;
        chain.external_mint("0x00000000000000000000000000000000000000bb");

        let event = tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("subscription closed"))?;
        assert_eq!(event.token_id, 1);
        assert!(subscription.is_active());

        subscription.unsubscribe();
        Ok(())
    }
}
