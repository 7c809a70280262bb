//! 订单域规范类型
//!
//! 每个实体一个规范 struct，存储行到 struct 的映射由服务端
//! db 层的边界函数完成。状态机规则集中在 [`OrderStatus`] 上，
//! 便于脱离存储单独测试。

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==================== Offer ====================

/// 库存单元状态
///
/// 派生规则：quantity <= 0 时强制 out_of_stock（除非已 inactive）；
/// quantity > 0 时从 out_of_stock 恢复 active。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Active,
    OutOfStock,
    Inactive,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OutOfStock => "out_of_stock",
            Self::Inactive => "inactive",
        }
    }

    /// 根据余量派生新状态
    ///
    /// inactive 是人工下架，数量变化不会改变它。
    pub fn derive(self, quantity: i32) -> Self {
        match self {
            Self::Inactive => Self::Inactive,
            _ if quantity <= 0 => Self::OutOfStock,
            _ => Self::Active,
        }
    }
}

impl FromStr for OfferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "out_of_stock" => Ok(Self::OutOfStock),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown offer status: {other}")),
        }
    }
}

/// 库存单元（打折出清的可售商品，库存有限）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    pub store_id: i64,
    /// 可售余量，恒 >= 0（由库存台账独占修改）
    pub quantity: i32,
    pub status: OfferStatus,
    pub unit_price: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

// ==================== Order Status ====================

/// 订单状态机
///
/// ```text
/// PENDING ──▶ PREPARING ──▶ READY ──▶ DELIVERING ──▶ COMPLETED
///    │            │                        (delivery only)
///    ├──▶ REJECTED (seller)                READY ──▶ COMPLETED (pickup)
///    └──▶ CANCELLED (customer)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Delivering,
    Completed,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Preparing => "PREPARING",
            Self::Ready => "READY",
            Self::Delivering => "DELIVERING",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// 终态订单不再变更，也不再占用库存
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// 单步可达状态表
    ///
    /// DELIVERING 仅对配送单存在；自取单从 READY 直接 COMPLETED。
    pub fn can_transition(&self, to: OrderStatus, order_type: OrderType) -> bool {
        use OrderStatus::*;
        match (*self, to) {
            (Pending, Preparing) => true,
            (Pending, Rejected) | (Pending, Cancelled) => true,
            (Preparing, Ready) => true,
            (Preparing, Rejected) | (Preparing, Cancelled) => true,
            (Ready, Delivering) => order_type == OrderType::Delivery,
            (Ready, Completed) => true,
            (Delivering, Completed) => order_type == OrderType::Delivery,
            _ => false,
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PREPARING" => Ok(Self::Preparing),
            "READY" => Ok(Self::Ready),
            "DELIVERING" => Ok(Self::Delivering),
            "COMPLETED" => Ok(Self::Completed),
            "REJECTED" => Ok(Self::Rejected),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Order Type ====================

/// 订单类型：到店自取或配送
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Pickup,
    Delivery,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pickup => "pickup",
            Self::Delivery => "delivery",
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(Self::Pickup),
            "delivery" => Ok(Self::Delivery),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

// ==================== Payment ====================

/// 支付方式
///
/// 网关方式（在线支付提供商）按名称保留，协议适配不在本仓库范围。
/// 文本形式与存储/传输一致："cash"、"card"、"bank_transfer"，
/// 其余任意字符串视为网关方式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Gateway(String),
}

impl PaymentMethod {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Gateway(name) => name,
        }
    }

    /// 支付方式 -> 初始支付状态的确定性映射
    pub fn initial_payment_status(&self) -> PaymentStatus {
        match self {
            Self::Cash => PaymentStatus::NotRequired,
            Self::Card | Self::BankTransfer => PaymentStatus::AwaitingProof,
            Self::Gateway(_) => PaymentStatus::AwaitingPayment,
        }
    }
}

impl From<String> for PaymentMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "cash" => Self::Cash,
            "card" => Self::Card,
            "bank_transfer" => Self::BankTransfer,
            _ => Self::Gateway(s),
        }
    }
}

impl From<PaymentMethod> for String {
    fn from(m: PaymentMethod) -> Self {
        m.as_str().to_string()
    }
}

/// 支付状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// 现金单无需线上支付
    NotRequired,
    /// 等待网关支付完成
    AwaitingPayment,
    /// 等待转账/刷卡凭证
    AwaitingProof,
    /// 已支付
    Paid,
    /// 订单取消/拒绝后作废
    Voided,
    /// 已退款（由支付协作方推送）
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::AwaitingPayment => "awaiting_payment",
            Self::AwaitingProof => "awaiting_proof",
            Self::Paid => "paid",
            Self::Voided => "voided",
            Self::Refunded => "refunded",
        }
    }

    /// 仍在等待支付动作的状态
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingPayment | Self::AwaitingProof)
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_required" => Ok(Self::NotRequired),
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "awaiting_proof" => Ok(Self::AwaitingProof),
            "paid" => Ok(Self::Paid),
            "voided" => Ok(Self::Voided),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

// ==================== Order ====================

/// 订单行项目
///
/// 单价在下单时冻结，后续 offer 调价不影响已有订单。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub offer_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderItem {
    /// 行小计
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// 统一订单记录（自取/配送，单项或多项）
///
/// 与对应的库存扣减在同一事务内创建；只转移状态，从不物理删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub store_id: i64,
    pub items: Vec<OrderItem>,
    pub order_type: OrderType,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    /// 自取单的取货码（短随机字母数字）
    pub pickup_code: Option<String>,
    /// 配送单的送达地址
    pub delivery_address: Option<String>,
    pub delivery_fee: Decimal,
    pub total_price: Decimal,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_single_step_reachability() {
        use OrderStatus::*;
        for ty in [OrderType::Pickup, OrderType::Delivery] {
            let reachable: Vec<OrderStatus> =
                [Preparing, Ready, Delivering, Completed, Rejected, Cancelled]
                    .into_iter()
                    .filter(|to| Pending.can_transition(*to, ty))
                    .collect();
            assert_eq!(reachable, vec![Preparing, Rejected, Cancelled]);
        }
    }

    #[test]
    fn completed_only_from_ready_or_delivering() {
        use OrderStatus::*;
        for from in [Pending, Preparing, Completed, Rejected, Cancelled] {
            assert!(!from.can_transition(Completed, OrderType::Delivery));
        }
        assert!(Ready.can_transition(Completed, OrderType::Pickup));
        assert!(Delivering.can_transition(Completed, OrderType::Delivery));
    }

    #[test]
    fn delivering_is_delivery_only() {
        assert!(OrderStatus::Ready.can_transition(OrderStatus::Delivering, OrderType::Delivery));
        assert!(!OrderStatus::Ready.can_transition(OrderStatus::Delivering, OrderType::Pickup));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use OrderStatus::*;
        for from in [Completed, Rejected, Cancelled] {
            assert!(from.is_terminal());
            for to in [Pending, Preparing, Ready, Delivering, Completed, Rejected, Cancelled] {
                assert!(!from.can_transition(to, OrderType::Delivery));
            }
        }
    }

    #[test]
    fn payment_method_maps_to_initial_status() {
        assert_eq!(
            PaymentMethod::Cash.initial_payment_status(),
            PaymentStatus::NotRequired
        );
        assert_eq!(
            PaymentMethod::Card.initial_payment_status(),
            PaymentStatus::AwaitingProof
        );
        assert_eq!(
            PaymentMethod::BankTransfer.initial_payment_status(),
            PaymentStatus::AwaitingProof
        );
        assert_eq!(
            PaymentMethod::Gateway("mbway".into()).initial_payment_status(),
            PaymentStatus::AwaitingPayment
        );
    }

    #[test]
    fn payment_method_parses_unknown_as_gateway() {
        let m = PaymentMethod::from("stripe".to_string());
        assert_eq!(m, PaymentMethod::Gateway("stripe".into()));
        assert_eq!(PaymentMethod::from("cash".to_string()), PaymentMethod::Cash);
    }

    #[test]
    fn offer_status_derivation() {
        assert_eq!(OfferStatus::Active.derive(0), OfferStatus::OutOfStock);
        assert_eq!(OfferStatus::OutOfStock.derive(3), OfferStatus::Active);
        assert_eq!(OfferStatus::Inactive.derive(5), OfferStatus::Inactive);
        assert_eq!(OfferStatus::Inactive.derive(0), OfferStatus::Inactive);
    }

    #[test]
    fn line_total_multiplies_price_by_quantity() {
        let item = OrderItem {
            offer_id: 1,
            quantity: 3,
            unit_price: Decimal::new(450, 2), // 4.50
        };
        assert_eq!(item.line_total(), Decimal::new(1350, 2));
    }
}
