//! Deposit estimation.
//!
//! Computes the NEAR a funder must attach (or hold on its Keypom balance) so that `create_drop`
//! or `add_keys` is not rejected for insufficient funds. Every term rounds up. Arithmetic is
//! checked: an overflow is an error, never a wrap.

use crate::{
    drops::{AssetVariant, FcData},
    error::KeypomError,
    primitives::{Balance, Gas, ONE_NEAR, TGAS},
};

/// Gas attached to a claim when the drop does not specify any.
pub const DEFAULT_ATTACHED_GAS: Gas = 100 * TGAS;

/// Storage and gas constants of the estimate.
///
/// The function call gas margin (`gas_margin_numerator / gas_margin_denominator`, compounded once
/// per cross contract call the attached gas can pay for) is not a protocol constant. Raise it if
/// the contract starts rejecting estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorConfig {
    /// Storage of the drop record itself. Only charged by `create_drop`.
    pub drop_storage: Balance,
    /// Storage of one key record.
    pub key_storage: Balance,
    /// Storage of one function call access key.
    pub access_key_storage: Balance,
    /// Storage of one stored password hash.
    pub password_storage_per_use: Balance,
    /// Smallest amount of gas a cross contract call burns.
    pub gas_per_ccc: Gas,
    /// Gas burnt spinning up a receipt.
    pub receipt_gas_cost: Gas,
    /// Gas price used for access key allowances, in yoctoNEAR per gas.
    pub yocto_per_gas: Balance,
    /// Numerator of the per-call gas growth margin.
    pub gas_margin_numerator: u128,
    /// Denominator of the per-call gas growth margin.
    pub gas_margin_denominator: u128,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            drop_storage: 34 * ONE_NEAR / 1_000,
            key_storage: 65 * ONE_NEAR / 10_000,
            access_key_storage: ONE_NEAR / 1_000,
            // 112 bytes at 10^19 yoctoNEAR per byte
            password_storage_per_use: 112 * 10u128.pow(19),
            gas_per_ccc: 5 * TGAS,
            receipt_gas_cost: 2_500_000_000_000,
            yocto_per_gas: 100_000_000,
            gas_margin_numerator: 103,
            gas_margin_denominator: 100,
        }
    }
}

/// Everything the estimate depends on.
#[derive(Debug, Clone)]
pub struct DepositRequest<'a> {
    /// NEAR released on every use, in yoctoNEAR.
    pub deposit_per_use: Balance,
    /// Keys being added.
    pub num_keys: u64,
    /// Uses of every key.
    pub uses_per_key: u64,
    /// Gas attached to each claim.
    pub attached_gas: Gas,
    /// The drop's asset.
    pub asset: &'a AssetVariant,
    /// `storage_balance_bounds().min` of the token contract. Required for fungible token drops.
    pub ft_storage_min: Option<Balance>,
    /// Password protected uses of every key.
    pub protected_uses: u64,
    /// Whether the drop record itself is being created.
    pub creates_drop: bool,
    /// Added verbatim.
    pub extra_deposit: Balance,
}

/// Breakdown of a deposit estimate, in yoctoNEAR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepositEstimate {
    /// Drop and key records.
    pub storage: Balance,
    /// Gas allowance of the access keys.
    pub allowance: Balance,
    /// Access key storage.
    pub access_key_storage: Balance,
    /// NEAR released by uses.
    pub deposits: Balance,
    /// Deposits attached to function calls.
    pub fc_deposits: Balance,
    /// Storage registrations of claimers on the token contract.
    pub ft_storage: Balance,
    /// Password hashes.
    pub password_storage: Balance,
    /// Caller supplied extra.
    pub extra: Balance,
}

impl DepositEstimate {
    /// Sum of every term.
    ///
    /// # Errors
    /// Returns `ArithmeticOverflow` if the sum exceeds `u128::MAX`.
    pub fn total(&self) -> Result<Balance, KeypomError> {
        [
            self.storage,
            self.allowance,
            self.access_key_storage,
            self.deposits,
            self.fc_deposits,
            self.ft_storage,
            self.password_storage,
            self.extra,
        ]
        .into_iter()
        .try_fold(0u128, |acc, term| add(acc, term, "deposit total"))
    }
}

fn add(a: u128, b: u128, context: &str) -> Result<u128, KeypomError> {
    a.checked_add(b).ok_or_else(|| KeypomError::overflow(context))
}

fn mul(a: u128, b: u128, context: &str) -> Result<u128, KeypomError> {
    a.checked_mul(b).ok_or_else(|| KeypomError::overflow(context))
}

/// Worst case allowance one key needs to claim with `attached_gas`.
///
/// Starting from `attached_gas + receipt_gas_cost`, the gas grows by the margin once per cross
/// contract call `attached_gas` can pay for, rounding up at every step. A final receipt is added
/// and the result is priced at `yocto_per_gas`.
///
/// # Errors
/// Returns `ArithmeticOverflow` for absurd gas amounts or margins.
pub fn pessimistic_allowance(
    config: &EstimatorConfig,
    attached_gas: Gas,
) -> Result<Balance, KeypomError> {
    if config.gas_margin_denominator == 0 {
        return Err(KeypomError::invalid_input(
            "gas_margin_denominator",
            "must not be zero",
        ));
    }
    let num_cccs = if config.gas_per_ccc == 0 {
        0
    } else {
        attached_gas / config.gas_per_ccc
    };

    let receipt = u128::from(config.receipt_gas_cost);
    let mut gas = add(u128::from(attached_gas), receipt, "allowance gas")?;
    for _ in 0..num_cccs {
        gas = mul(gas, config.gas_margin_numerator, "allowance gas")?
            .div_ceil(config.gas_margin_denominator);
    }
    gas = add(gas, receipt, "allowance gas")?;
    mul(gas, config.yocto_per_gas, "allowance")
}

/// Validates the method sets of a function call drop against its uses.
///
/// A single set applies to every use. Otherwise there must be exactly one set per use.
///
/// # Errors
/// Returns `InvalidInput` when the counts disagree.
pub fn validate_fc_methods(fc: &FcData, uses_per_key: u64) -> Result<(), KeypomError> {
    let sets = fc.methods.len() as u64;
    if sets == 0 {
        return Err(KeypomError::invalid_input(
            "fc.methods",
            "at least one method set is required",
        ));
    }
    if sets != 1 && sets != uses_per_key {
        return Err(KeypomError::invalid_input(
            "fc.methods",
            format!("{sets} method sets for {uses_per_key} uses per key"),
        ));
    }
    Ok(())
}

/// Uses of a function call drop that call nothing (null method sets).
#[must_use]
pub fn none_fc_uses(fc: &FcData) -> u64 {
    fc.methods.iter().filter(|set| set.is_none()).count() as u64
}

/// Deposits attached to the function calls of one key, across all of its uses.
///
/// # Errors
/// Returns `ArithmeticOverflow` if the sum exceeds `u128::MAX`.
pub fn fc_deposits_per_key(fc: &FcData, uses_per_key: u64) -> Result<Balance, KeypomError> {
    let set_total = |set: &Option<Vec<crate::drops::MethodData>>| {
        set.iter()
            .flatten()
            .try_fold(0u128, |acc, method| {
                add(acc, method.attached_deposit, "fc deposits")
            })
    };

    if let ([only], true) = (fc.methods.as_slice(), uses_per_key != 1) {
        return mul(set_total(only)?, u128::from(uses_per_key), "fc deposits");
    }
    fc.methods
        .iter()
        .try_fold(0u128, |acc, set| add(acc, set_total(set)?, "fc deposits"))
}

/// Computes the deposit required by `request`.
///
/// # Errors
/// Returns `InvalidInput` for inconsistent requests, `MissingParameter` if a fungible token drop
/// lacks its storage bounds and `ArithmeticOverflow` if any term exceeds `u128::MAX`.
pub fn estimate_required_deposit(
    config: &EstimatorConfig,
    request: &DepositRequest<'_>,
) -> Result<DepositEstimate, KeypomError> {
    if request.uses_per_key == 0 {
        return Err(KeypomError::invalid_input(
            "uses_per_key",
            "must be at least 1",
        ));
    }
    if request.protected_uses > request.uses_per_key {
        return Err(KeypomError::invalid_input(
            "password_protected_uses",
            "more protected uses than uses per key",
        ));
    }

    let keys = u128::from(request.num_keys);
    let uses = u128::from(request.uses_per_key);

    let drop_storage = if request.creates_drop {
        config.drop_storage
    } else {
        0
    };
    let storage = add(
        drop_storage,
        mul(config.key_storage, keys, "key storage")?,
        "storage",
    )?;
    let allowance = mul(
        pessimistic_allowance(config, request.attached_gas)?,
        keys,
        "allowance",
    )?;
    let access_key_storage = mul(config.access_key_storage, keys, "access key storage")?;

    let (fc_deposits, paid_uses) = match request.asset {
        AssetVariant::FunctionCallSet(fc) => {
            validate_fc_methods(fc, request.uses_per_key)?;
            let per_key = fc_deposits_per_key(fc, request.uses_per_key)?;
            let paid_uses = request.uses_per_key.saturating_sub(none_fc_uses(fc));
            (mul(per_key, keys, "fc deposits")?, paid_uses)
        }
        _ => (0, request.uses_per_key),
    };
    let deposits = mul(
        mul(request.deposit_per_use, u128::from(paid_uses), "deposits")?,
        keys,
        "deposits",
    )?;

    let ft_storage = match request.asset {
        AssetVariant::FungibleToken(_) => {
            let min = request
                .ft_storage_min
                .ok_or_else(|| KeypomError::MissingParameter {
                    parameter: "ft_storage_min".to_string(),
                })?;
            let registrations = add(mul(keys, uses, "ft storage")?, 1, "ft storage")?;
            mul(min, registrations, "ft storage")?
        }
        _ => 0,
    };

    let password_storage = mul(
        mul(
            config.password_storage_per_use,
            u128::from(request.protected_uses),
            "password storage",
        )?,
        keys,
        "password storage",
    )?;

    let estimate = DepositEstimate {
        storage,
        allowance,
        access_key_storage,
        deposits,
        fc_deposits,
        ft_storage,
        password_storage,
        extra: request.extra_deposit,
    };
    // surface an overflowing total here rather than at the call site
    estimate.total()?;
    Ok(estimate)
}
