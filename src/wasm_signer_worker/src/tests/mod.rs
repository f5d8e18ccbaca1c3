mod actions_tests;
mod cose_tests;
mod crypto_tests;
mod dispatch_tests;
mod nep413_tests;
mod transaction_tests;
