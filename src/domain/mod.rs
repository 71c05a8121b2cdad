pub mod escrow;
pub mod money;
pub mod order;
pub mod payment_method;
pub mod transaction;
pub mod wallet;

pub use escrow::{EscrowStatus, EscrowTransaction, ReleaseCondition};
pub use order::{Order, OrderStatus};
pub use payment_method::PaymentMethod;
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use wallet::Wallet;
