use alloy_primitives::{Address, Signature};
use alloy_signer::Signer as AlloySigner;

/// Wallet seam for payment signing. Key custody stays with the implementor;
/// the session only needs an address and a personal-sign primitive.
pub trait PaymentSigner {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Address whose lowercase hex form becomes the session payer.
    fn payer_address(&self) -> Address;

    /// Personal-sign (EIP-191) the exact signing message bytes.
    fn sign_payment_message(
        &self,
        message: &[u8],
    ) -> impl Future<Output = Result<Signature, Self::Error>>;
}

impl<S: AlloySigner + Sync> PaymentSigner for S {
    type Error = alloy_signer::Error;

    fn payer_address(&self) -> Address {
        self.address()
    }

    async fn sign_payment_message(&self, message: &[u8]) -> Result<Signature, Self::Error> {
        self.sign_message(message).await
    }
}
